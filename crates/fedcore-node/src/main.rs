//! Binary entry point: loads configuration, wires the federation service,
//! and runs its event loop until a shutdown signal arrives.

use fedcore_service::{config::ModelConfig, config::PrivacyBudgetConfig, FederationConfig, FederationService};
use fedcore_types::{AggregationStrategy, CoreResult, PrivacyLevel, WeightTensor};
use std::env;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn load_config() -> CoreResult<FederationConfig> {
    if let Ok(path) = env::var("FEDCORE_CONFIG") {
        let bytes = std::fs::read(&path).map_err(|e| {
            fedcore_types::CoreError::ConfigInvalid(format!("could not read {path}: {e}"))
        })?;
        let config: FederationConfig = serde_json::from_slice(&bytes)
            .map_err(|e| fedcore_types::CoreError::ConfigInvalid(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    } else {
        let config = FederationConfig {
            instance_id: env::var("FEDCORE_INSTANCE_ID").unwrap_or_else(|_| "fedcore-node-1".to_string()),
            federation_enabled: true,
            privacy_level: PrivacyLevel::Moderate,
            max_participants: 10,
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
                input_dims: 128,
                hidden_layers: vec![64, 32],
                output_dims: 10,
                learning_rate: 0.01,
                epochs: 1,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "refusing to start with invalid configuration");
            std::process::exit(1);
        }
    };

    let now_ms = chrono::Utc::now().timestamp_millis();
    let initial_model = WeightTensor::new(vec![vec![0.0; config.model_config.output_dims]]);
    let mut service = match FederationService::initialize(config, initial_model, now_ms) {
        Ok(service) => service,
        Err(err) => {
            error!(%err, "failed to initialize federation service");
            std::process::exit(1);
        }
    };

    let mut events = service.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(?event, "federation event");
        }
    });

    let mut shutdown = Box::pin(tokio::signal::ctrl_c());
    let mut round_tick = tokio::time::interval(std::time::Duration::from_millis(30_000));
    let mut fabric_tick = tokio::time::interval(std::time::Duration::from_millis(5_000));
    let mut open_rounds: Vec<String> = Vec::new();

    info!("fedcore-node running");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                let _ = service.shutdown();
                break;
            }
            _ = round_tick.tick() => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                match service.start_round(now_ms) {
                    Ok(Some(round_id)) => open_rounds.push(round_id),
                    Ok(None) => {}
                    Err(err) => error!(%err, "start_round failed"),
                }
            }
            _ = fabric_tick.tick() => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                service.tick_fabric(now_ms).await;

                open_rounds.retain(|round_id| {
                    if let Err(err) = service.advance_round(round_id, now_ms) {
                        error!(%err, round_id, "advance_round failed");
                        return false;
                    }
                    matches!(service.round_state(round_id), Some(fedcore_types::RoundState::Open))
                });
            }
        }
    }
}
