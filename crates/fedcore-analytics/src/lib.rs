//! Convergence, participation, privacy, performance, and quality metrics,
//! fed back into participant selection and exclusion (spec §4.F).

use fedcore_types::{AggregationResult, PrivacyBudget};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

const TREND_CAPACITY: usize = 1_000;
const DEFAULT_SMOOTHING_ALPHA: f64 = 0.15;

fn smooth(previous: f64, sample: f64, alpha: f64) -> f64 {
    alpha * sample + (1.0 - alpha) * previous
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConvergenceMetrics {
    pub global_accuracy: f64,
    pub rounds_to_convergence: Option<u64>,
    pub convergence_rate: f64,
    pub stability: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ParticipationMetrics {
    pub active_participants: usize,
    pub average_participants: f64,
    pub turnover: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PrivacyMetrics {
    pub budget_utilization: f64,
    pub avg_noise_level: f64,
    pub violations: u64,
    pub information_leakage_estimate: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub avg_training_time_ms: f64,
    pub communication_overhead_bytes: f64,
    pub network_efficiency: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub model_quality: f64,
    pub data_quality: f64,
    pub pattern_diversity: f64,
    pub knowledge_transfer: f64,
}

/// One sample in the convergence trend ring buffer (spec §9's ring-buffer
/// guidance for history rings, capacity 1,000).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LearningTrend {
    pub round: u64,
    pub timestamp_ms: i64,
    pub accuracy: f64,
    pub loss: f64,
    pub participant_count: usize,
}

/// Per-participant rollup (spec §4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantAnalytics {
    pub instance_id: String,
    pub contribution_quality: f64,
    pub data_contribution: f64,
    pub participation_rate: f64,
    pub reputation: f64,
    pub last_active_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub convergence: ConvergenceMetrics,
    pub participation: ParticipationMetrics,
    pub privacy: PrivacyMetrics,
    pub performance: PerformanceMetrics,
    pub quality: QualityMetrics,
    pub trends: Vec<LearningTrend>,
    pub participants: Vec<ParticipantAnalytics>,
    pub emergent_patterns: Vec<String>,
    pub recommendations: Vec<String>,
    pub byzantine_events: u64,
}

pub struct Analytics {
    alpha: f64,
    convergence: ConvergenceMetrics,
    participation: ParticipationMetrics,
    privacy: PrivacyMetrics,
    performance: PerformanceMetrics,
    quality: QualityMetrics,
    trends: VecDeque<LearningTrend>,
    participants: HashMap<String, ParticipantAnalytics>,
    rounds_observed: u64,
}

impl Analytics {
    pub fn new() -> Self {
        Self::with_alpha(DEFAULT_SMOOTHING_ALPHA)
    }

    pub fn with_alpha(alpha: f64) -> Self {
        Self {
            alpha,
            convergence: ConvergenceMetrics::default(),
            participation: ParticipationMetrics::default(),
            privacy: PrivacyMetrics::default(),
            performance: PerformanceMetrics::default(),
            quality: QualityMetrics::default(),
            trends: VecDeque::with_capacity(TREND_CAPACITY),
            participants: HashMap::new(),
            rounds_observed: 0,
        }
    }

    /// Folds a completed round's `AggregationResult` into the convergence
    /// and participation metric groups, and appends a trend sample.
    pub fn record_round(&mut self, result: &AggregationResult, total_known_instances: usize, now_ms: i64) {
        self.rounds_observed += 1;

        self.convergence.global_accuracy = smooth(self.convergence.global_accuracy, result.accuracy, self.alpha);
        self.convergence.convergence_rate = smooth(
            self.convergence.convergence_rate,
            result.convergence.improvement.abs(),
            self.alpha,
        );
        self.convergence.stability = smooth(self.convergence.stability, result.convergence.stability, self.alpha);
        if self.convergence.rounds_to_convergence.is_none() && result.convergence.stability > 0.95 {
            self.convergence.rounds_to_convergence = Some(self.rounds_observed);
        }

        self.participation.active_participants = result.participant_count;
        self.participation.average_participants =
            smooth(self.participation.average_participants, result.participant_count as f64, self.alpha);
        if total_known_instances > 0 {
            let turnover_sample = 1.0 - (result.participant_count as f64 / total_known_instances as f64);
            self.participation.turnover = smooth(self.participation.turnover, turnover_sample.max(0.0), self.alpha);
        }

        if self.trends.len() == TREND_CAPACITY {
            self.trends.pop_front();
        }
        self.trends.push_back(LearningTrend {
            round: self.rounds_observed,
            timestamp_ms: now_ms,
            accuracy: result.accuracy,
            loss: result.convergence.loss,
            participant_count: result.participant_count,
        });
    }

    /// Folds privacy-accountant state into the privacy metric group.
    pub fn record_privacy(&mut self, budget: &PrivacyBudget, noise_level: f64, violation: bool) {
        self.privacy.budget_utilization = budget.epsilon_consumed / budget.epsilon_total;
        self.privacy.avg_noise_level = smooth(self.privacy.avg_noise_level, noise_level, self.alpha);
        if violation {
            self.privacy.violations += 1;
        }
        // Heuristic: leakage grows with both spend fraction and noise scale
        // shrinking relative to it; a tighter accountant (high utilization,
        // low noise) should read as higher estimated leakage.
        self.privacy.information_leakage_estimate =
            self.privacy.budget_utilization * (1.0 / (1.0 + noise_level)).min(1.0);
    }

    pub fn record_performance(&mut self, training_time_ms: f64, communication_bytes: f64) {
        self.performance.avg_training_time_ms = smooth(self.performance.avg_training_time_ms, training_time_ms, self.alpha);
        self.performance.communication_overhead_bytes =
            smooth(self.performance.communication_overhead_bytes, communication_bytes, self.alpha);
        self.performance.network_efficiency = if communication_bytes > 0.0 {
            (1.0 / (1.0 + communication_bytes / 1_000_000.0)).clamp(0.0, 1.0)
        } else {
            1.0
        };
    }

    pub fn record_quality(&mut self, model_quality: f64, data_quality: f64, pattern_diversity: f64, knowledge_transfer: f64) {
        self.quality.model_quality = smooth(self.quality.model_quality, model_quality, self.alpha);
        self.quality.data_quality = smooth(self.quality.data_quality, data_quality, self.alpha);
        self.quality.pattern_diversity = smooth(self.quality.pattern_diversity, pattern_diversity, self.alpha);
        self.quality.knowledge_transfer = smooth(self.quality.knowledge_transfer, knowledge_transfer, self.alpha);
    }

    pub fn record_participant(
        &mut self,
        instance_id: impl Into<String>,
        contribution_quality: f64,
        data_contribution: f64,
        reputation: f64,
        now_ms: i64,
    ) {
        let instance_id = instance_id.into();
        let entry = self.participants.entry(instance_id.clone()).or_insert_with(|| ParticipantAnalytics {
            instance_id,
            contribution_quality,
            data_contribution,
            participation_rate: 0.0,
            reputation,
            last_active_ms: now_ms,
        });
        entry.contribution_quality = smooth(entry.contribution_quality, contribution_quality, self.alpha);
        entry.data_contribution = smooth(entry.data_contribution, data_contribution, self.alpha);
        entry.participation_rate = smooth(entry.participation_rate, 1.0, self.alpha);
        entry.reputation = reputation;
        entry.last_active_ms = now_ms;
    }

    fn recommendations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.convergence.convergence_rate < 0.01 && self.rounds_observed > 1 {
            out.push("adjust learning rate".to_string());
        }
        if self.participation.turnover > 0.4 {
            out.push("investigate participant churn".to_string());
        }
        if self.privacy.budget_utilization > 0.9 {
            out.push("raise privacy budget or reduce round frequency".to_string());
        }
        if self.performance.network_efficiency < 0.3 {
            out.push("enable update compression".to_string());
        }
        out
    }

    fn emergent_patterns(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.convergence.stability > 0.9 {
            out.push("model has stabilized across recent rounds".to_string());
        }
        if self.quality.pattern_diversity > 0.7 {
            out.push("high cross-participant pattern diversity".to_string());
        }
        out
    }

    /// `byzantine_events` comes from the consensus engine's own evidence
    /// ring buffer (spec §4.D); `Analytics` has no Byzantine-reporting
    /// surface of its own, so the caller folds it in here.
    pub fn report(&self, byzantine_events: u64) -> Report {
        Report {
            convergence: self.convergence,
            participation: self.participation,
            privacy: self.privacy,
            performance: self.performance,
            quality: self.quality,
            trends: self.trends.iter().copied().collect(),
            participants: self.participants.values().cloned().collect(),
            emergent_patterns: self.emergent_patterns(),
            recommendations: self.recommendations(),
            byzantine_events,
        }
    }
}

impl Default for Analytics {
    fn default() -> Self {
        Self::new()
    }
}
