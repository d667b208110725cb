use serde::{Deserialize, Serialize};

/// User-visible events emitted by the core (spec §7). Delivered through a
/// subscriber registry rather than direct callbacks, per spec §9's
/// event-emitter rearchitecture guidance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FederationEvent {
    BudgetLow { consumed_fraction: f64 },
    BudgetExhausted,
    RoundCancelled { round_id: String, reason: String },
    RoundCompleted { round_id: String, participant_count: usize },
    ConsensusReached { proposal_id: String, approved: bool },
    ByzantineDetected { instance_id: String, severity: String },
    PeerJoined { instance_id: String },
    PeerLeft { instance_id: String },
}
