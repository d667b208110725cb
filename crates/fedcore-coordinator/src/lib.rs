//! Round lifecycle and aggregation: the component that turns submitted
//! local updates into a new global model (spec §4.C).

pub mod aggregate;
pub mod selection;

use chrono::Utc;
use fedcore_privacy::Accountant;
use fedcore_types::{
    AggregationResult, AggregationStrategy, ConvergenceMetrics, CoreError, CoreResult, GlobalModel,
    LocalUpdate, Round, RoundCancelReason, RoundState, SelectionCriteria, WeightTensor,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// Parameters a caller supplies when opening a round.
pub struct RoundConfig {
    pub min_participants: usize,
    pub max_participants: usize,
    pub aggregation_strategy: AggregationStrategy,
    pub selection_criteria: SelectionCriteria,
    pub timeout_ms: i64,
}

/// Owns the active-round table and the current global model. External
/// readers only ever go through its operations (spec §5's
/// shared-resource discipline).
pub struct Coordinator {
    rounds: HashMap<String, Round>,
    global_model: GlobalModel,
    next_round_seq: u64,
}

impl Coordinator {
    pub fn new(initial_model: WeightTensor, now_ms: i64) -> Self {
        Self {
            rounds: HashMap::new(),
            global_model: GlobalModel::genesis(initial_model, now_ms),
            next_round_seq: 0,
        }
    }

    /// Restores a coordinator around an already-known global model,
    /// skipping genesis (spec §6 restart contract).
    pub fn from_global_model(global_model: GlobalModel) -> Self {
        Self {
            rounds: HashMap::new(),
            global_model,
            next_round_seq: 0,
        }
    }

    pub fn global_model(&self) -> &GlobalModel {
        &self.global_model
    }

    pub fn round(&self, round_id: &str) -> Option<&Round> {
        self.rounds.get(round_id)
    }

    /// `start_round()` (spec §4.C): opens a new round with a deadline
    /// timer installed at `now_ms + config.timeout_ms`.
    pub fn start_round(&mut self, config: RoundConfig, now_ms: i64) -> String {
        self.next_round_seq += 1;
        let round_id = format!("round_{}", self.next_round_seq);
        let round = Round {
            id: round_id.clone(),
            start_time_ms: now_ms,
            deadline_ms: now_ms + config.timeout_ms,
            min_participants: config.min_participants,
            max_participants: config.max_participants,
            aggregation_strategy: config.aggregation_strategy,
            selection_criteria: config.selection_criteria,
            updates: BTreeMap::new(),
            state: RoundState::Open,
        };
        info!(round_id = %round_id, "round opened");
        self.rounds.insert(round_id.clone(), round);
        round_id
    }

    /// `submit(update)` (spec §4.C): validates shape, sample/accuracy
    /// gates, round match, and duplicate-submission exclusion.
    pub fn submit(&mut self, update: LocalUpdate) -> CoreResult<RoundState> {
        let round = self
            .rounds
            .get_mut(&update.round_id)
            .ok_or_else(|| CoreError::InvalidUpdate(format!("unknown round {}", update.round_id)))?;

        if round.state != RoundState::Open {
            return Err(CoreError::InvalidUpdate(format!(
                "round {} is not open",
                round.id
            )));
        }
        if update.sample_count < round.selection_criteria.min_samples {
            return Err(CoreError::InvalidUpdate(format!(
                "sample_count {} below minimum {}",
                update.sample_count, round.selection_criteria.min_samples
            )));
        }
        if update.accuracy < round.selection_criteria.min_accuracy {
            return Err(CoreError::InvalidUpdate(format!(
                "accuracy {} below minimum {}",
                update.accuracy, round.selection_criteria.min_accuracy
            )));
        }
        if update.weights.assert_same_shape(&self.global_model.weights).is_err() {
            let expected = self.global_model.weights.shape();
            let actual = update.weights.shape();
            self.cancel(&update.round_id, RoundCancelReason::ShapeMismatch);
            return Err(CoreError::ShapeMismatch { expected, actual });
        }
        if round.updates.contains_key(&update.instance_id) {
            return Err(CoreError::InvalidUpdate(format!(
                "duplicate submission from {} for round {}",
                update.instance_id, round.id
            )));
        }

        round.updates.insert(update.instance_id.clone(), update);
        if round.is_full() {
            round.state = RoundState::Completing;
        }
        Ok(round.state)
    }

    /// Evaluates the deadline for `round_id`, moving it to `COMPLETING` or
    /// `CANCELLED` (spec §4.C's state machine). No-op once the round has
    /// already left `OPEN`.
    pub fn check_deadline(&mut self, round_id: &str, now_ms: i64) -> CoreResult<RoundState> {
        let round = self
            .rounds
            .get_mut(round_id)
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown round {round_id}")))?;
        if round.state != RoundState::Open {
            return Ok(round.state);
        }
        if now_ms <= round.deadline_ms {
            return Ok(round.state);
        }
        round.state = if round.has_minimum() {
            RoundState::Completing
        } else {
            warn!(round_id, "round timed out with insufficient participants");
            RoundState::Cancelled
        };
        Ok(round.state)
    }

    /// `complete(round_id)` (spec §4.C): selects participants, aggregates,
    /// and produces an `AggregationResult`. `reputations` is a read-only
    /// snapshot supplied by the caller, since reputation is owned by
    /// consensus/fabric, not the coordinator (spec §3's ownership
    /// summary).
    pub fn complete(
        &mut self,
        round_id: &str,
        reputations: &HashMap<String, f64>,
        accountant: Option<&mut Accountant>,
        now_ms: i64,
    ) -> CoreResult<AggregationResult> {
        let round = self
            .rounds
            .get(round_id)
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown round {round_id}")))?;
        if round.state != RoundState::Completing {
            return Err(CoreError::InvalidInput(format!(
                "round {round_id} is not ready to complete"
            )));
        }

        let candidates: Vec<(String, f64, u64, f64)> = round
            .updates
            .values()
            .map(|u| {
                let reputation = reputations.get(&u.instance_id).copied().unwrap_or(1.0);
                (u.instance_id.clone(), u.accuracy, u.sample_count, reputation)
            })
            .collect();
        let selected_ids = selection::select_top(candidates, round.max_participants);
        let selected: Vec<&LocalUpdate> = selected_ids
            .iter()
            .filter_map(|id| round.updates.get(id))
            .collect();

        let strategy = round.aggregation_strategy;
        let aggregation = match strategy {
            AggregationStrategy::FedAvg => aggregate::weighted_average(&selected),
            AggregationStrategy::SecureAgg => aggregate::secure_aggregate(&selected),
            AggregationStrategy::DifferentialPrivate => {
                let accountant = accountant.ok_or_else(|| {
                    CoreError::InvalidInput("differential_private strategy requires an accountant".into())
                })?;
                let sensitivity = accountant.clip_threshold();
                aggregate::differential_private_aggregate(&selected, accountant, sensitivity)
            }
        };

        let (new_weights, new_accuracy) = match aggregation {
            Ok(pair) => pair,
            Err(err) => {
                self.cancel(round_id, RoundCancelReason::QuorumShort);
                return Err(err);
            }
        };

        let convergence = ConvergenceMetrics::compute(
            &self.global_model.weights,
            &new_weights,
            self.global_model.accuracy,
            new_accuracy,
        );

        let result = AggregationResult {
            round_id: round_id.to_string(),
            weights: new_weights.clone(),
            participant_count: selected.len(),
            accuracy: new_accuracy,
            convergence,
        };

        self.global_model = GlobalModel {
            round: self.next_round_seq,
            weights: new_weights,
            accuracy: new_accuracy,
            last_updated_ms: now_ms,
        };

        if let Some(round) = self.rounds.get_mut(round_id) {
            round.state = RoundState::Done;
        }
        info!(round_id, participant_count = result.participant_count, "round completed");

        Ok(result)
    }

    /// Cancels a round for `reason`, leaving the global model untouched
    /// (spec §4.C's failure semantics).
    pub fn cancel(&mut self, round_id: &str, reason: RoundCancelReason) {
        if let Some(round) = self.rounds.get_mut(round_id) {
            round.state = RoundState::Cancelled;
            warn!(round_id, ?reason, "round cancelled");
        }
    }

    pub fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}
