//! The differential-privacy accountant: gradient clipping, calibrated
//! noise, and an auditable ε/δ budget.

use chrono::Utc;
use fedcore_types::{AuditEntry, CoreError, CoreResult, Layer, PrivacyBudget, PrivacyLevel};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use statrs::distribution::Laplace;
use tracing::{info, warn};

/// Noise mechanism selected for a `privatize` call (spec §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Gaussian,
    Laplace,
}

impl Mechanism {
    fn tag(self) -> &'static str {
        match self {
            Mechanism::Gaussian => "gaussian_mechanism",
            Mechanism::Laplace => "laplace_mechanism",
        }
    }
}

/// Projected cost of an operation without spending budget (spec §4.A's
/// `analyze`).
#[derive(Debug, Clone, Copy)]
pub struct Analysis {
    pub projected_epsilon: f64,
    pub feasible: bool,
}

/// Per-participant ε/δ budget tracker, gradient clipper, and noise
/// calibrator. Owns the single writer for its `PrivacyBudget`
/// (spec §5's shared-resource discipline).
pub struct Accountant {
    level: PrivacyLevel,
    budget: PrivacyBudget,
    audit_log: Vec<AuditEntry>,
}

impl Accountant {
    pub fn new(level: PrivacyLevel) -> Self {
        Self {
            level,
            budget: PrivacyBudget::new(level.epsilon(), level.delta()),
            audit_log: Vec::new(),
        }
    }

    /// Rebuilds an accountant from a persisted snapshot (spec §6 restart
    /// contract) instead of starting a fresh budget.
    pub fn from_snapshot(level: PrivacyLevel, budget: PrivacyBudget, audit_log: Vec<AuditEntry>) -> Self {
        Self {
            level,
            budget,
            audit_log,
        }
    }

    /// Builds an accountant around a caller-supplied budget instead of the
    /// fixed constants `PrivacyLevel` would otherwise derive, so a
    /// configured `total`/`delta`/`consumed` actually governs spend.
    pub fn with_budget(level: PrivacyLevel, budget: PrivacyBudget) -> Self {
        Self {
            level,
            budget,
            audit_log: Vec::new(),
        }
    }

    pub fn budget(&self) -> PrivacyBudget {
        self.budget
    }

    pub fn audit_log(&self) -> &[AuditEntry] {
        &self.audit_log
    }

    /// Clips each layer's L2 norm to at most `threshold`, scaling the whole
    /// layer down when it exceeds it. Pure: does not touch the budget.
    pub fn clip(layers: &[Layer], threshold: f64) -> Vec<Layer> {
        layers
            .iter()
            .map(|layer| {
                let norm = l2_norm(layer);
                if norm <= threshold || norm == 0.0 {
                    layer.clone()
                } else {
                    let scale = (threshold / norm) as f32;
                    layer.iter().map(|&v| v * scale).collect()
                }
            })
            .collect()
    }

    /// `true` iff at least `level.ε / 20` of budget remains (spec §4.A).
    pub fn can_participate(&self) -> bool {
        self.budget.remaining() >= self.level.epsilon_min()
    }

    /// The L2-norm clip threshold this accountant's configured
    /// `PrivacyLevel` applies before noising (spec §4.A), exposed so
    /// callers needing DP sensitivity can derive it instead of guessing.
    pub fn clip_threshold(&self) -> f64 {
        self.level.clip_threshold()
    }

    /// Projects the ε cost of an operation without spending it.
    pub fn analyze(&self, _op: &str, _data_size: usize, _sensitivity: f64) -> Analysis {
        let projected = self.level.default_op_epsilon();
        Analysis {
            projected_epsilon: projected,
            feasible: !self.budget.would_exceed(projected),
        }
    }

    /// Clips then noises `layers`, spending `level.ε / 10` of budget on
    /// success. Always appends an Audit Entry, even on
    /// [`CoreError::BudgetExhausted`] (with `epsilon_spent = 0`).
    pub fn privatize(
        &mut self,
        layers: &[Layer],
        sensitivity: f64,
        operation_tag: &str,
    ) -> CoreResult<Vec<Layer>> {
        self.privatize_with(layers, sensitivity, operation_tag, Mechanism::Gaussian, None)
    }

    /// Like [`Accountant::privatize`] but with an explicit ε per call,
    /// letting a caller plug in a real moments/RDP accountant instead of
    /// the heuristic `level.ε / 10` default (spec §9 Open Question).
    pub fn privatize_with(
        &mut self,
        layers: &[Layer],
        sensitivity: f64,
        operation_tag: &str,
        mechanism: Mechanism,
        epsilon_override: Option<f64>,
    ) -> CoreResult<Vec<Layer>> {
        let epsilon_op = epsilon_override.unwrap_or_else(|| self.level.default_op_epsilon());
        let delta_op = self.level.delta();

        if self.budget.would_exceed(epsilon_op) {
            self.record_audit(operation_tag, 0.0, 0.0, "budget would be exceeded");
            warn!(operation_tag, epsilon_op, "privacy budget exhausted");
            return Err(CoreError::BudgetExhausted {
                attempted: epsilon_op,
                remaining: self.budget.remaining(),
            });
        }

        let clipped = Self::clip(layers, self.level.clip_threshold());
        let scale = match mechanism {
            Mechanism::Gaussian => gaussian_scale(sensitivity, epsilon_op, delta_op),
            Mechanism::Laplace => laplace_scale(sensitivity, epsilon_op),
        };
        let noised: Vec<Layer> = clipped
            .iter()
            .map(|layer| {
                layer
                    .iter()
                    .map(|&v| v + sample_noise(mechanism, scale) as f32)
                    .collect()
            })
            .collect();

        self.budget.epsilon_consumed += epsilon_op;
        self.record_audit(operation_tag, epsilon_op, delta_op, mechanism.tag());
        info!(operation_tag, epsilon_op, "privacy budget spent");
        Ok(noised)
    }

    /// Audited reset of the total budget (spec §3's only permitted way for
    /// `epsilon_consumed` to move backward).
    pub fn reset(&mut self, new_total: f64, justification: &str) {
        self.budget = PrivacyBudget::new(new_total, self.budget.delta);
        self.record_audit("reset", 0.0, 0.0, justification);
    }

    fn record_audit(&mut self, operation: &str, epsilon_spent: f64, delta_spent: f64, justification: &str) {
        self.audit_log.push(AuditEntry {
            operation: operation.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
            epsilon_spent,
            delta_spent,
            budget_after: self.budget.epsilon_consumed,
            justification: justification.to_string(),
        });
    }
}

fn l2_norm(layer: &[f32]) -> f64 {
    layer.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>().sqrt()
}

/// σ = sensitivity · √(2·ln(1.25/δ)) / ε (spec §4.A).
fn gaussian_scale(sensitivity: f64, epsilon: f64, delta: f64) -> f64 {
    sensitivity * (2.0 * (1.25 / delta).ln()).sqrt() / epsilon
}

/// b = sensitivity / ε (spec §4.A).
fn laplace_scale(sensitivity: f64, epsilon: f64) -> f64 {
    sensitivity / epsilon
}

fn sample_noise(mechanism: Mechanism, scale: f64) -> f64 {
    match mechanism {
        Mechanism::Gaussian => {
            let normal = Normal::new(0.0, scale).expect("gaussian scale must be finite and positive");
            normal.sample(&mut rand::thread_rng())
        }
        Mechanism::Laplace => {
            Laplace::new(0.0, scale).expect("laplace scale must be finite and positive");
            // statrs' Laplace has no built-in sampler; invert the CDF of a
            // uniform draw the way the teacher's mechanism does.
            let u: f64 = rand::thread_rng().gen_range(-0.5..0.5);
            -scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_scales_down_layer_exceeding_threshold() {
        let layers = vec![vec![3.0_f32, 4.0]];
        let clipped = Accountant::clip(&layers, 2.0);
        let norm = l2_norm(&clipped[0]);
        assert!((norm - 2.0).abs() < 1e-5);
    }

    #[test]
    fn clip_is_idempotent() {
        let layers = vec![vec![3.0_f32, 4.0]];
        let once = Accountant::clip(&layers, 2.0);
        let twice = Accountant::clip(&once, 2.0);
        assert_eq!(once, twice);
    }

    #[test]
    fn clip_leaves_layer_under_threshold_untouched() {
        let layers = vec![vec![0.1_f32, 0.1]];
        let clipped = Accountant::clip(&layers, 2.0);
        assert_eq!(layers, clipped);
    }

    #[test]
    fn can_participate_false_below_epsilon_min() {
        let mut accountant = Accountant::new(PrivacyLevel::Strict);
        // strict: epsilon_total = 1.0, epsilon_min = 0.05
        accountant.budget.epsilon_consumed = 0.96;
        assert!(!accountant.can_participate());
    }

    #[test]
    fn privatize_writes_audit_entry_on_success() {
        let mut accountant = Accountant::new(PrivacyLevel::Moderate);
        let layers = vec![vec![1.0_f32, 1.0]];
        let result = accountant.privatize(&layers, 1.0, "round_1_update");
        assert!(result.is_ok());
        assert_eq!(accountant.audit_log().len(), 1);
        assert!(accountant.audit_log()[0].epsilon_spent > 0.0);
    }

    #[test]
    fn privatize_fails_and_still_audits_on_exhaustion() {
        let mut accountant = Accountant::new(PrivacyLevel::Moderate);
        accountant.budget.epsilon_consumed = 0.9; // moderate total = 3.0, op = 0.3
        accountant.budget.epsilon_total = 1.0;
        let layers = vec![vec![1.0_f32]];
        let result = accountant.privatize(&layers, 1.0, "round_2_update");
        assert!(matches!(result, Err(CoreError::BudgetExhausted { .. })));
        assert_eq!(accountant.audit_log().len(), 1);
        assert_eq!(accountant.audit_log()[0].epsilon_spent, 0.0);
    }

    #[test]
    fn reset_is_audited_and_zeroes_consumed() {
        let mut accountant = Accountant::new(PrivacyLevel::Strict);
        accountant.budget.epsilon_consumed = 0.5;
        accountant.reset(2.0, "quarterly policy review");
        assert_eq!(accountant.budget().epsilon_consumed, 0.0);
        assert_eq!(accountant.budget().epsilon_total, 2.0);
        assert_eq!(accountant.audit_log().last().unwrap().operation, "reset");
    }
}
