//! Aggregation strategies, dispatched as a tagged variant rather than a
//! class hierarchy (spec §9).

use fedcore_privacy::Accountant;
use fedcore_secure_agg::{self as secure_agg};
use fedcore_types::{CoreError, CoreResult, Layer, LocalUpdate, WeightTensor};

/// Sample-count-weighted average of `updates`' weights and accuracies
/// (spec §4.C's `fedavg`; also used to report accuracy for `secure_agg`
/// per the Open Question this crate resolves in its accompanying design
/// notes: accuracy is reported pre-aggregation, not securely summed).
pub fn weighted_average(updates: &[&LocalUpdate]) -> CoreResult<(WeightTensor, f64)> {
    let total_samples: u64 = updates.iter().map(|u| u.sample_count).sum();
    if total_samples == 0 {
        return Err(CoreError::InvalidUpdate("no samples to aggregate".into()));
    }

    let shape = updates[0].weights.shape();
    for u in updates {
        u.weights.assert_same_shape(&updates[0].weights)?;
    }

    let mut out: Vec<Layer> = shape.iter().map(|&n| vec![0.0_f32; n]).collect();
    let mut accuracy = 0.0;
    for update in updates {
        let w = update.sample_count as f64 / total_samples as f64;
        for (layer_idx, layer) in update.weights.layers.iter().enumerate() {
            for (scalar_idx, &v) in layer.iter().enumerate() {
                out[layer_idx][scalar_idx] += (v as f64 * w) as f32;
            }
        }
        accuracy += update.accuracy * w;
    }

    Ok((WeightTensor::new(out), accuracy))
}

/// Delegates to secure aggregation: shares each contributor's weights,
/// reconstructs the layer-wise sum from the combined shares, and divides
/// by contributor count (spec §4.B step 4, §4.C's `secure_agg`).
pub fn secure_aggregate(updates: &[&LocalUpdate]) -> CoreResult<(WeightTensor, f64)> {
    let n = updates.len();
    let t = secure_agg::threshold_for(n);

    let per_participant: Vec<Vec<Vec<Layer>>> = updates
        .iter()
        .map(|u| secure_agg::share_tensor(&u.weights, n, t))
        .collect();

    let combined: Vec<(u32, Vec<Layer>)> = (0..n)
        .map(|peer_idx| {
            let bundles: Vec<Vec<Layer>> = per_participant.iter().map(|p| p[peer_idx].clone()).collect();
            ((peer_idx + 1) as u32, secure_agg::sum_shares_elementwise(&bundles))
        })
        .collect();

    let weights = secure_agg::reconstruct_tensor_sum(&combined, t, n)?;
    let (_, accuracy) = weighted_average(updates)?;
    Ok((weights, accuracy))
}

/// Runs `fedavg`, then adds Gaussian noise calibrated by the accountant
/// (spec §4.C's `differential_private`).
pub fn differential_private_aggregate(
    updates: &[&LocalUpdate],
    accountant: &mut Accountant,
    sensitivity: f64,
) -> CoreResult<(WeightTensor, f64)> {
    let (weights, accuracy) = weighted_average(updates)?;
    let noised_layers = accountant.privatize(&weights.layers, sensitivity, "dp_fedavg_round")?;
    Ok((WeightTensor::new(noised_layers), accuracy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedcore_types::{AggregationStrategy, SelectionCriteria};

    fn update(instance_id: &str, round_id: &str, layer: Vec<f32>, sample_count: u64, accuracy: f64) -> LocalUpdate {
        LocalUpdate {
            round_id: round_id.to_string(),
            instance_id: instance_id.to_string(),
            weights: WeightTensor::new(vec![layer]),
            sample_count,
            accuracy,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn happy_fedavg_round_matches_spec_scenario() {
        let u1 = update("inst-1", "r1", vec![1.0, 2.0], 10, 0.8);
        let u2 = update("inst-2", "r1", vec![2.0, 3.0], 30, 0.9);
        let u3 = update("inst-3", "r1", vec![3.0, 4.0], 60, 0.95);
        let refs = vec![&u1, &u2, &u3];

        let (weights, accuracy) = weighted_average(&refs).unwrap();
        let expected_layer0 = 0.1 * 1.0 + 0.3 * 2.0 + 0.6 * 3.0;
        assert!((weights.layers[0][0] - expected_layer0 as f32).abs() < 1e-4);
        assert!((accuracy - 0.92).abs() < 1e-6);
        let _ = AggregationStrategy::FedAvg;
        let _ = SelectionCriteria::default();
    }

    #[test]
    fn secure_aggregate_recovers_fedavg_numerator_sum() {
        let u1 = update("inst-1", "r1", vec![2.0, -1.0], 10, 0.8);
        let u2 = update("inst-2", "r1", vec![1.0, 1.0], 10, 0.9);
        let u3 = update("inst-3", "r1", vec![0.0, 3.0], 10, 0.7);
        let refs = vec![&u1, &u2, &u3];

        let (weights, _) = secure_aggregate(&refs).unwrap();
        assert!((weights.layers[0][0] - 1.0).abs() < 1e-3); // (2+1+0)/3
        assert!((weights.layers[0][1] - 1.0).abs() < 1e-3); // (-1+1+3)/3
    }
}
