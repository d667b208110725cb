use fedcore_types::{AggregationStrategy, CoreError, CoreResult, PrivacyBudget, PrivacyLevel};
use serde::{Deserialize, Serialize};

/// Model architecture parameters the core treats as opaque sizing
/// information — it never runs training itself (spec §1 Non-goals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_dims: usize,
    pub hidden_layers: Vec<usize>,
    pub output_dims: usize,
    pub learning_rate: f64,
    pub epochs: usize,
}

/// `privacy_budget = {epsilon > 0, 0 < delta < 1, total > 0, 0 ≤ consumed ≤ total}`
/// (spec §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrivacyBudgetConfig {
    pub epsilon: f64,
    pub delta: f64,
    pub total: f64,
    pub consumed: f64,
}

impl PrivacyBudgetConfig {
    /// Maps the configured budget onto the accountant's `PrivacyBudget`,
    /// so `total`/`consumed`/`delta` actually govern spend instead of
    /// being validated and discarded.
    pub fn to_budget(self) -> PrivacyBudget {
        PrivacyBudget {
            epsilon_total: self.total,
            epsilon_consumed: self.consumed,
            delta: self.delta,
        }
    }
}

/// The full enumerated configuration surface (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    pub instance_id: String,
    #[serde(default)]
    pub federation_enabled: bool,
    pub privacy_level: PrivacyLevel,
    pub max_participants: usize,
    pub minimum_participants: usize,
    #[serde(default = "default_round_timeout")]
    pub round_timeout_ms: i64,
    pub aggregation_strategy: AggregationStrategy,
    pub privacy_budget: PrivacyBudgetConfig,
    pub model_config: ModelConfig,
}

fn default_round_timeout() -> i64 {
    300_000
}

impl FederationConfig {
    /// Refuses `initialize` with **ConfigInvalid** when any enumerated
    /// constraint is violated (spec §6, §7).
    pub fn validate(&self) -> CoreResult<()> {
        if self.instance_id.trim().is_empty() {
            return Err(CoreError::ConfigInvalid("instance_id must not be empty".into()));
        }
        if self.max_participants < 2 {
            return Err(CoreError::ConfigInvalid("max_participants must be >= 2".into()));
        }
        if self.minimum_participants < 1 {
            return Err(CoreError::ConfigInvalid("minimum_participants must be >= 1".into()));
        }
        if self.minimum_participants > self.max_participants {
            return Err(CoreError::ConfigInvalid(
                "minimum_participants must be <= max_participants".into(),
            ));
        }
        let budget = &self.privacy_budget;
        if budget.epsilon <= 0.0 {
            return Err(CoreError::ConfigInvalid("privacy_budget.epsilon must be > 0".into()));
        }
        if !(0.0 < budget.delta && budget.delta < 1.0) {
            return Err(CoreError::ConfigInvalid("privacy_budget.delta must be in (0, 1)".into()));
        }
        if budget.total <= 0.0 {
            return Err(CoreError::ConfigInvalid("privacy_budget.total must be > 0".into()));
        }
        if !(0.0..=budget.total).contains(&budget.consumed) {
            return Err(CoreError::ConfigInvalid(
                "privacy_budget.consumed must be within [0, total]".into(),
            ));
        }
        let model = &self.model_config;
        if model.input_dims == 0 || model.output_dims == 0 {
            return Err(CoreError::ConfigInvalid("model dims must be > 0".into()));
        }
        if model.hidden_layers.iter().any(|&h| h < 1) {
            return Err(CoreError::ConfigInvalid("hidden_layers entries must be >= 1".into()));
        }
        if !(0.0 < model.learning_rate && model.learning_rate <= 1.0) {
            return Err(CoreError::ConfigInvalid("learning_rate must be in (0, 1]".into()));
        }
        if model.epochs == 0 {
            return Err(CoreError::ConfigInvalid("epochs must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> FederationConfig {
        FederationConfig {
            instance_id: "inst-1".into(),
            federation_enabled: false,
            privacy_level: PrivacyLevel::Moderate,
            max_participants: 5,
            minimum_participants: 2,
            round_timeout_ms: default_round_timeout(),
            aggregation_strategy: AggregationStrategy::FedAvg,
            privacy_budget: PrivacyBudgetConfig {
                epsilon: 3.0,
                delta: 1e-4,
                total: 3.0,
                consumed: 0.0,
            },
            model_config: ModelConfig {
                input_dims: 10,
                hidden_layers: vec![64, 32],
                output_dims: 2,
                learning_rate: 0.01,
                epochs: 5,
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn minimum_exceeding_max_is_invalid() {
        let mut config = valid_config();
        config.minimum_participants = 10;
        assert!(matches!(config.validate(), Err(CoreError::ConfigInvalid(_))));
    }

    #[test]
    fn delta_outside_unit_interval_is_invalid() {
        let mut config = valid_config();
        config.privacy_budget.delta = 1.5;
        assert!(matches!(config.validate(), Err(CoreError::ConfigInvalid(_))));
    }
}
