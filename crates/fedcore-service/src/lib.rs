//! Top-level orchestrator wiring the DP accountant, round coordinator,
//! consensus engine, communication fabric, and analytics, and exposing
//! the public operations a caller actually drives (spec §4.G).

pub mod config;
pub mod store;

pub use config::{FederationConfig, ModelConfig, PrivacyBudgetConfig};
pub use store::{MemoryStore, Store};

use fedcore_analytics::{Analytics, Report};
use fedcore_consensus::ConsensusEngine;
use fedcore_coordinator::{Coordinator, RoundConfig};
use fedcore_fabric::{ChannelTransport, Fabric};
use fedcore_privacy::Accountant;
use fedcore_types::{AuditEntry, CoreError, CoreResult, FederationEvent, GlobalModel, PrivacyBudget, WeightTensor};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Everything a restarting instance needs to resume without replaying
/// history (spec §6: "A long-running instance must be able to restart
/// with: peer table, privacy budget snapshot and audit log, consensus
/// history, last known global model").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StateSnapshot {
    pub global_model: GlobalModel,
    pub privacy_budget: PrivacyBudget,
    pub audit_log: Vec<AuditEntry>,
}

/// A snapshot returned by `status()` (spec §4.G).
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub instance_id: String,
    pub federation_enabled: bool,
    pub global_model_round: u64,
    pub global_model_accuracy: f64,
    pub can_participate: bool,
    pub known_peers: usize,
}

/// Owns the Round Coordinator, DP Accountant, Consensus Engine,
/// Analytics, and the local Fabric instance exclusively (spec §3's
/// ownership summary).
pub struct FederationService {
    config: FederationConfig,
    federation_enabled: bool,
    accountant: Accountant,
    coordinator: Coordinator,
    consensus: ConsensusEngine,
    fabric: Fabric,
    analytics: Analytics,
    events: broadcast::Sender<FederationEvent>,
}

impl FederationService {
    /// `initialize` (spec §4.G): validates configuration and wires every
    /// owned component.
    pub fn initialize(config: FederationConfig, initial_model: WeightTensor, now_ms: i64) -> CoreResult<Self> {
        config.validate()?;

        let accountant = Accountant::with_budget(config.privacy_level, config.privacy_budget.to_budget());
        let coordinator = Coordinator::new(initial_model, now_ms);
        let consensus = ConsensusEngine::new();
        let transport = Arc::new(ChannelTransport::new());
        let fabric = Fabric::new(config.instance_id.clone(), transport);
        let analytics = Analytics::new();
        let (events, _rx) = broadcast::channel(256);

        let federation_enabled = config.federation_enabled;
        info!(instance_id = %config.instance_id, "federation service initialized");

        Ok(Self {
            config,
            federation_enabled,
            accountant,
            coordinator,
            consensus,
            fabric,
            analytics,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FederationEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: FederationEvent) {
        let _ = self.events.send(event);
    }

    /// `join(network, discovery_nodes)` (spec §4.G).
    pub fn join(&mut self, network_id: impl Into<String>, discovery_nodes: Vec<String>) {
        self.fabric.register(network_id, discovery_nodes);
        self.consensus.register_voter(self.config.instance_id.clone(), 1.0);
    }

    /// Drives the Fabric's own tick (peer liveness, periodic discovery,
    /// retries) and folds the peer events it returns back into Consensus,
    /// registering newly-announced remote peers as voters and dropping
    /// departed ones (spec §4.E/§4.D's peer-to-voter handoff).
    pub async fn tick_fabric(&mut self, now_ms: i64) -> Vec<FederationEvent> {
        let events = self.fabric.tick(now_ms).await;
        for event in &events {
            match event {
                FederationEvent::PeerJoined { instance_id } => {
                    self.consensus.register_voter(instance_id.clone(), 1.0);
                }
                FederationEvent::PeerLeft { instance_id: _ } => {}
                _ => {}
            }
            self.emit(event.clone());
        }
        events
    }

    /// Delivers one raw inbound network message to the Fabric, forwarding
    /// it to `tick_fabric`'s voter bookkeeping indirectly the next time it
    /// runs (announcements/discovery replies only update the peer table
    /// here; registration happens on the following tick).
    pub async fn dispatch_message(&mut self, raw_bytes: &[u8], now_ms: i64) -> fedcore_fabric::DispatchOutcome {
        self.fabric.dispatch(raw_bytes, now_ms).await
    }

    /// Current lifecycle state of a still-tracked round, if any (spec
    /// §4.C); lets a caller poll rounds to completion without reaching
    /// into the Coordinator directly.
    pub fn round_state(&self, round_id: &str) -> Option<fedcore_types::RoundState> {
        self.coordinator.round(round_id).map(|r| r.state)
    }

    /// `start_round(local_patterns)` (spec §4.G): a no-op while
    /// `federation_enabled = false` or the accountant cannot participate.
    pub fn start_round(&mut self, now_ms: i64) -> CoreResult<Option<String>> {
        if !self.federation_enabled {
            return Ok(None);
        }
        if !self.accountant.can_participate() {
            warn!("start_round refused: privacy budget exhausted");
            self.emit(FederationEvent::BudgetExhausted);
            return Ok(None);
        }
        if self.accountant.budget().epsilon_consumed / self.accountant.budget().epsilon_total > 0.9 {
            self.emit(FederationEvent::BudgetLow {
                consumed_fraction: self.accountant.budget().epsilon_consumed / self.accountant.budget().epsilon_total,
            });
        }

        let round_id = self.coordinator.start_round(
            RoundConfig {
                min_participants: self.config.minimum_participants,
                max_participants: self.config.max_participants,
                aggregation_strategy: self.config.aggregation_strategy,
                selection_criteria: Default::default(),
                timeout_ms: self.config.round_timeout_ms,
            },
            now_ms,
        );
        Ok(Some(round_id))
    }

    pub fn submit_update(&mut self, update: fedcore_types::LocalUpdate) -> CoreResult<fedcore_types::RoundState> {
        self.coordinator.submit(update)
    }

    /// Evaluates a round's deadline and, if it becomes ready, completes it
    /// and folds the result into analytics (spec §4.C, §4.F).
    pub fn advance_round(&mut self, round_id: &str, now_ms: i64) -> CoreResult<()> {
        let state = self.coordinator.check_deadline(round_id, now_ms)?;
        match state {
            fedcore_types::RoundState::Completing => {
                let reputations: HashMap<String, f64> = self
                    .fabric
                    .peers()
                    .values()
                    .map(|p| (p.instance_id.clone(), self.consensus.reputation_of(&p.instance_id).unwrap_or(1.0)))
                    .collect();
                let accountant = if self.config.aggregation_strategy
                    == fedcore_types::AggregationStrategy::DifferentialPrivate
                {
                    Some(&mut self.accountant)
                } else {
                    None
                };
                match self.coordinator.complete(round_id, &reputations, accountant, now_ms) {
                    Ok(result) => {
                        self.analytics.record_round(&result, self.fabric.peers().len().max(1), now_ms);
                        self.emit(FederationEvent::RoundCompleted {
                            round_id: round_id.to_string(),
                            participant_count: result.participant_count,
                        });
                    }
                    Err(err) => {
                        self.emit(FederationEvent::RoundCancelled {
                            round_id: round_id.to_string(),
                            reason: err.to_string(),
                        });
                    }
                }
            }
            fedcore_types::RoundState::Cancelled => {
                self.emit(FederationEvent::RoundCancelled {
                    round_id: round_id.to_string(),
                    reason: "insufficient_participants".to_string(),
                });
            }
            _ => {}
        }
        Ok(())
    }

    /// `update_config` (spec §4.G).
    pub fn update_config(&mut self, new_config: FederationConfig) -> CoreResult<()> {
        new_config.validate()?;
        self.federation_enabled = new_config.federation_enabled;
        self.config = new_config;
        Ok(())
    }

    /// `opt_out` (spec §4.G).
    pub fn opt_out(&mut self) {
        self.federation_enabled = false;
    }

    /// `opt_in` (spec §4.G).
    pub fn opt_in(&mut self) {
        self.federation_enabled = true;
    }

    /// `status` (spec §4.G).
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            instance_id: self.config.instance_id.clone(),
            federation_enabled: self.federation_enabled,
            global_model_round: self.coordinator.global_model().round,
            global_model_accuracy: self.coordinator.global_model().accuracy,
            can_participate: self.accountant.can_participate(),
            known_peers: self.fabric.peers().len(),
        }
    }

    /// `analytics` (spec §4.G).
    pub fn analytics(&self) -> Report {
        self.analytics.report(self.consensus.byzantine_event_count())
    }

    /// Passthrough for externally-observed Byzantine behavior (spec
    /// §4.D), e.g. a peer caught submitting a malformed secure-aggregation
    /// share.
    pub fn report_byzantine_evidence(
        &mut self,
        instance_id: &str,
        severity: fedcore_consensus::ByzantineSeverity,
        now_ms: i64,
    ) -> Option<String> {
        let proposal_id = self.consensus.report_byzantine_evidence(instance_id, severity, now_ms);
        self.emit(FederationEvent::ByzantineDetected {
            instance_id: instance_id.to_string(),
            severity: format!("{severity:?}"),
        });
        proposal_id
    }

    /// `shutdown` (spec §4.G): cooperative, drains by simply refusing new
    /// rounds; in-flight aggregations already returned by the time a
    /// caller observes this.
    pub fn shutdown(&mut self) -> CoreResult<()> {
        self.federation_enabled = false;
        info!(instance_id = %self.config.instance_id, "federation service shutting down");
        Err(CoreError::Shutdown)
    }

    /// Snapshot of everything a restart needs (spec §6). Consensus history
    /// and the peer table are reconstructed from the network on rejoin
    /// rather than persisted, matching `join`'s re-announcement flow.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            global_model: self.coordinator.global_model().clone(),
            privacy_budget: self.accountant.budget(),
            audit_log: self.accountant.audit_log().to_vec(),
        }
    }

    /// Persists the current snapshot under `instance_id`.
    pub fn persist(&self, store: &dyn Store) {
        store::save_versioned(store, &self.config.instance_id, self.snapshot());
    }

    /// Rebuilds a service around a persisted snapshot instead of a fresh
    /// genesis model and empty budget (spec §6).
    pub fn restore(config: FederationConfig, store: &dyn Store) -> CoreResult<Self> {
        config.validate()?;
        let snapshot: Option<StateSnapshot> = store::load_versioned(store, &config.instance_id);

        let (coordinator, accountant) = match snapshot {
            Some(snapshot) => (
                Coordinator::from_global_model(snapshot.global_model),
                Accountant::from_snapshot(config.privacy_level, snapshot.privacy_budget, snapshot.audit_log),
            ),
            None => {
                let dims = config.model_config.output_dims;
                (
                    Coordinator::new(WeightTensor::new(vec![vec![0.0; dims]]), 0),
                    Accountant::new(config.privacy_level),
                )
            }
        };

        let consensus = ConsensusEngine::new();
        let transport = Arc::new(ChannelTransport::new());
        let fabric = Fabric::new(config.instance_id.clone(), transport);
        let analytics = Analytics::new();
        let (events, _rx) = broadcast::channel(256);
        let federation_enabled = config.federation_enabled;
        info!(instance_id = %config.instance_id, "federation service restored from snapshot");

        Ok(Self {
            config,
            federation_enabled,
            accountant,
            coordinator,
            consensus,
            fabric,
            analytics,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedcore_types::{AggregationStrategy, PrivacyLevel};

    fn config(federation_enabled: bool) -> FederationConfig {
        FederationConfig {
            instance_id: "inst-1".into(),
            federation_enabled,
            privacy_level: PrivacyLevel::Moderate,
            max_participants: 3,
            minimum_participants: 2,
            round_timeout_ms: 300_000,
            aggregation_strategy: AggregationStrategy::FedAvg,
            privacy_budget: PrivacyBudgetConfig {
                epsilon: 3.0,
                delta: 1e-4,
                total: 3.0,
                consumed: 0.0,
            },
            model_config: ModelConfig {
                input_dims: 4,
                hidden_layers: vec![8],
                output_dims: 2,
                learning_rate: 0.01,
                epochs: 1,
            },
        }
    }

    #[test]
    fn start_round_is_noop_while_federation_disabled() {
        let mut service =
            FederationService::initialize(config(false), WeightTensor::new(vec![vec![0.0, 0.0]]), 0).unwrap();
        let round = service.start_round(0).unwrap();
        assert!(round.is_none());
    }

    #[test]
    fn start_round_refused_when_budget_exhausted() {
        let mut service =
            FederationService::initialize(config(true), WeightTensor::new(vec![vec![0.0, 0.0]]), 0).unwrap();
        // drain the budget below epsilon_min (moderate: epsilon_min = 0.15)
        for _ in 0..20 {
            let _ = service.accountant.privatize(&[vec![0.0]], 1.0, "drain");
        }
        let round = service.start_round(0).unwrap();
        assert!(round.is_none());
    }

    #[test]
    fn initialize_threads_configured_budget_into_accountant() {
        let mut cfg = config(true);
        cfg.privacy_budget = PrivacyBudgetConfig {
            epsilon: 3.0,
            delta: 1e-4,
            total: 5.0,
            consumed: 1.0,
        };
        let service = FederationService::initialize(cfg, WeightTensor::new(vec![vec![0.0, 0.0]]), 0).unwrap();
        assert_eq!(service.accountant.budget().epsilon_total, 5.0);
        assert_eq!(service.accountant.budget().epsilon_consumed, 1.0);
    }

    #[tokio::test]
    async fn tick_fabric_registers_announced_peer_as_voter() {
        let mut service =
            FederationService::initialize(config(true), WeightTensor::new(vec![vec![0.0, 0.0]]), 0).unwrap();
        service.join("net-1", vec![]);

        let sender_keypair = fedcore_types::crypto::KeyPair::generate();
        let payload = serde_json::json!({"endpoint": "inst-2-endpoint"});
        let mut message = fedcore_types::NetworkMessage {
            id: "m1".into(),
            message_type: fedcore_types::MessageType::Announcement,
            sender: "inst-2".into(),
            recipients: None,
            payload,
            timestamp: chrono::Utc::now(),
            nonce: "n1".into(),
            signature: String::new(),
        };
        let bytes = message.canonical_bytes();
        message.signature = sender_keypair.sign(&bytes);
        let raw = serde_json::to_vec(&message).unwrap();

        service.dispatch_message(&raw, 0).await;
        assert!(service.consensus.reputation_of("inst-2").is_none());

        service.tick_fabric(0).await;
        assert_eq!(service.consensus.reputation_of("inst-2"), Some(1.0));
    }

    #[test]
    fn shutdown_disables_federation_and_errors() {
        let mut service =
            FederationService::initialize(config(true), WeightTensor::new(vec![vec![0.0, 0.0]]), 0).unwrap();
        let result = service.shutdown();
        assert!(matches!(result, Err(CoreError::Shutdown)));
        assert!(!service.status().federation_enabled);
    }

    #[test]
    fn restore_recovers_budget_and_model_from_snapshot() {
        let store = MemoryStore::new();
        let mut service =
            FederationService::initialize(config(true), WeightTensor::new(vec![vec![0.5, 0.5]]), 0).unwrap();
        let _ = service.accountant.privatize(&[vec![0.1, 0.1]], 1.0, "spend");
        service.persist(&store);

        let restored = FederationService::restore(config(true), &store).unwrap();
        assert_eq!(restored.accountant.budget().epsilon_consumed, service.accountant.budget().epsilon_consumed);
        assert_eq!(restored.coordinator.global_model().round, service.coordinator.global_model().round);
    }

    #[test]
    fn restore_without_snapshot_starts_fresh() {
        let store = MemoryStore::new();
        let restored = FederationService::restore(config(true), &store).unwrap();
        assert_eq!(restored.accountant.budget().epsilon_consumed, 0.0);
        assert_eq!(restored.coordinator.global_model().round, 0);
    }
}
