use serde::{Deserialize, Serialize};

use crate::tensor::WeightTensor;

/// Aggregation strategy tag, chosen over a class hierarchy per spec §9's
/// polymorphism guidance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    FedAvg,
    SecureAgg,
    DifferentialPrivate,
}

/// Round lifecycle states (spec §4.C).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoundState {
    Open,
    Completing,
    Done,
    Cancelled,
    TimedOut,
}

/// Selection criteria controlling which submitted updates are eligible for
/// aggregation (spec §3's `Round.selection_criteria`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionCriteria {
    pub min_samples: u64,
    pub min_accuracy: f64,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            min_samples: 1,
            min_accuracy: 0.0,
        }
    }
}

/// One participant's contribution to a round (spec §3's Local Update).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalUpdate {
    pub round_id: String,
    pub instance_id: String,
    pub weights: WeightTensor,
    pub sample_count: u64,
    pub accuracy: f64,
    pub timestamp_ms: i64,
}

/// An active or finished aggregation round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    pub start_time_ms: i64,
    pub deadline_ms: i64,
    pub min_participants: usize,
    pub max_participants: usize,
    pub aggregation_strategy: AggregationStrategy,
    pub selection_criteria: SelectionCriteria,
    pub updates: std::collections::BTreeMap<String, LocalUpdate>,
    pub state: RoundState,
}

impl Round {
    pub fn is_full(&self) -> bool {
        self.updates.len() >= self.max_participants
    }

    pub fn has_minimum(&self) -> bool {
        self.updates.len() >= self.min_participants
    }
}

/// The federation's singleton current model (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalModel {
    pub round: u64,
    pub weights: WeightTensor,
    pub accuracy: f64,
    pub last_updated_ms: i64,
}

impl GlobalModel {
    pub fn genesis(weights: WeightTensor, now_ms: i64) -> Self {
        Self {
            round: 0,
            weights,
            accuracy: 0.0,
            last_updated_ms: now_ms,
        }
    }
}

/// Convergence metrics attached to a completed round (spec §4.C).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConvergenceMetrics {
    pub loss: f64,
    pub improvement: f64,
    pub stability: f64,
}

impl ConvergenceMetrics {
    pub fn compute(old: &WeightTensor, new: &WeightTensor, old_accuracy: f64, new_accuracy: f64) -> Self {
        let loss: f64 = old
            .layers
            .iter()
            .zip(new.layers.iter())
            .flat_map(|(lo, ln)| lo.iter().zip(ln.iter()))
            .map(|(&o, &n)| {
                let d = (n - o) as f64;
                d * d
            })
            .sum::<f64>()
            .sqrt();
        let improvement = new_accuracy - old_accuracy;
        let stability = (1.0 - loss / 10.0).max(0.0);
        Self {
            loss,
            improvement,
            stability,
        }
    }
}

/// Output of a successful `complete(round_id)` (spec §4.C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationResult {
    pub round_id: String,
    pub weights: WeightTensor,
    pub participant_count: usize,
    pub accuracy: f64,
    pub convergence: ConvergenceMetrics,
}

/// Reason a round ended without producing an `AggregationResult`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundCancelReason {
    InsufficientParticipants,
    ShapeMismatch,
    QuorumShort,
}
