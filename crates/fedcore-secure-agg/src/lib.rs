//! Shamir secret-sharing secure aggregation.
//!
//! This is the float-field variant the design notes call out as
//! "acceptable for prototypes but MUST be marked as such": coefficients and
//! shares are plain `f64`, not elements of a 256-bit prime field. It is
//! adequate for the scale of weight vectors this core handles and avoids
//! pulling in a bignum crate the rest of the workspace has no other use
//! for; it is not suitable for adversarial deployments where a participant
//! can see more than `t-1` shares and attempt off-path numerical attacks.

use fedcore_types::{CoreError, CoreResult, Layer, WeightTensor};
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Coefficients are drawn from `[-bound, bound]`, wide enough to dominate
/// `f64` round-off relative to plausible clipped weight magnitudes.
const COEFFICIENT_BOUND: f64 = 1.0e6;

/// `t = ⌊2n/3⌋ + 1` (spec §4.B).
pub fn threshold_for(n: usize) -> usize {
    (2 * n) / 3 + 1
}

/// One participant's share of a single scalar secret, evaluated at `x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Share {
    pub x: u32,
    pub y: f64,
}

fn sample_coefficients(secret: f64, degree: usize) -> Vec<f64> {
    let mut rng = rand::thread_rng();
    let mut coeffs = Vec::with_capacity(degree + 1);
    coeffs.push(secret);
    for _ in 0..degree {
        coeffs.push(rng.gen_range(-COEFFICIENT_BOUND..COEFFICIENT_BOUND));
    }
    coeffs
}

fn eval_poly(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Splits `secret` into `n` shares recoverable by any `t` of them.
pub fn share_scalar(secret: f64, n: usize, t: usize) -> Vec<Share> {
    let coeffs = sample_coefficients(secret, t - 1);
    (1..=n)
        .map(|x| Share {
            x: x as u32,
            y: eval_poly(&coeffs, x as f64),
        })
        .collect()
}

/// Lagrange interpolation at `x = 0`, recovering the polynomial's constant
/// term (the shared secret, or a sum of shared secrets when `shares` are
/// themselves elementwise sums of per-participant shares at matching `x`).
pub fn reconstruct(shares: &[Share], t: usize) -> CoreResult<f64> {
    if shares.len() < t {
        return Err(CoreError::QuorumShort {
            needed: t,
            had: shares.len(),
        });
    }
    let used = &shares[..t];
    let mut secret = 0.0;
    for (j, sj) in used.iter().enumerate() {
        let mut term = sj.y;
        for (m, sm) in used.iter().enumerate() {
            if m == j {
                continue;
            }
            term *= (0.0 - sm.x as f64) / (sj.x as f64 - sm.x as f64);
        }
        secret += term;
    }
    Ok(secret)
}

/// `H(weights)` over the tensor's flattened bytes, plus a proof binding the
/// commitment to `nonce` (spec §4.B step 2, §6's fixed 64-hex digests).
pub fn commit(weights: &WeightTensor, nonce: &str) -> (String, String) {
    let mut hasher = Sha256::new();
    for layer in &weights.layers {
        for &v in layer {
            hasher.update(v.to_le_bytes());
        }
    }
    let commitment = format!("{:x}", hasher.finalize_reset());
    hasher.update(commitment.as_bytes());
    hasher.update(nonce.as_bytes());
    let proof = format!("{:x}", hasher.finalize());
    (commitment, proof)
}

/// One participant's full tensor, shared scalar-by-scalar into `n` peer
/// shares (spec §4.B step 1). `bundles[k]` is the share set destined for
/// peer `k+1`.
pub fn share_tensor(weights: &WeightTensor, n: usize, t: usize) -> Vec<Vec<Layer>> {
    let mut bundles: Vec<Vec<Layer>> = (0..n)
        .map(|_| weights.layers.iter().map(|l| vec![0.0_f32; l.len()]).collect())
        .collect();
    for (layer_idx, layer) in weights.layers.iter().enumerate() {
        for (scalar_idx, &scalar) in layer.iter().enumerate() {
            let shares = share_scalar(scalar as f64, n, t);
            for (peer_idx, share) in shares.into_iter().enumerate() {
                bundles[peer_idx][layer_idx][scalar_idx] = share.y as f32;
            }
        }
    }
    bundles
}

/// Sums same-index shares across participants elementwise. Each peer would
/// do this locally on the shares it received in a real deployment; the
/// core performs it centrally since peer-to-peer relay belongs to the
/// communication fabric.
pub fn sum_shares_elementwise(per_participant: &[Vec<Layer>]) -> Vec<Layer> {
    let layer_shapes: Vec<usize> = per_participant[0].iter().map(|l| l.len()).collect();
    let mut summed: Vec<Layer> = layer_shapes.iter().map(|&n| vec![0.0_f32; n]).collect();
    for bundle in per_participant {
        for (layer_idx, layer) in bundle.iter().enumerate() {
            for (scalar_idx, &v) in layer.iter().enumerate() {
                summed[layer_idx][scalar_idx] += v;
            }
        }
    }
    summed
}

/// Reconstructs the layer-wise sum of contributors' tensors from at least
/// `t` verified combined shares, then normalizes by contributor count to
/// produce the aggregate (spec §4.B step 4).
pub fn reconstruct_tensor_sum(
    combined_shares: &[(u32, Vec<Layer>)],
    t: usize,
    contributor_count: usize,
) -> CoreResult<WeightTensor> {
    if combined_shares.len() < t {
        return Err(CoreError::QuorumShort {
            needed: t,
            had: combined_shares.len(),
        });
    }
    let layer_shapes: Vec<usize> = combined_shares[0].1.iter().map(|l| l.len()).collect();
    let mut out: Vec<Layer> = layer_shapes.iter().map(|&n| vec![0.0_f32; n]).collect();
    for (layer_idx, &layer_len) in layer_shapes.iter().enumerate() {
        for scalar_idx in 0..layer_len {
            let points: Vec<Share> = combined_shares
                .iter()
                .map(|(x, layers)| Share {
                    x: *x,
                    y: layers[layer_idx][scalar_idx] as f64,
                })
                .collect();
            let sum = reconstruct(&points, t)?;
            out[layer_idx][scalar_idx] = (sum / contributor_count as f64) as f32;
        }
    }
    Ok(WeightTensor::new(out))
}

/// A share that failed structural verification (spec §4.B step 3): the
/// caller is expected to decrease `sender`'s reputation.
pub fn reject_malformed<'a>(
    senders: &'a [String],
    well_formed: &[bool],
) -> Vec<&'a str> {
    senders
        .iter()
        .zip(well_formed.iter())
        .filter_map(|(id, &ok)| {
            if !ok {
                warn!(instance_id = %id, "rejecting malformed secure share");
                Some(id.as_str())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_matches_spec_formula() {
        assert_eq!(threshold_for(5), 4);
        assert_eq!(threshold_for(3), 3);
        assert_eq!(threshold_for(7), 5);
    }

    #[test]
    fn scalar_share_reconstructs_from_exactly_t_shares() {
        let n = 5;
        let t = threshold_for(n);
        let secret = 2.0_f64;
        let shares = share_scalar(secret, n, t);
        let recovered = reconstruct(&shares[..t], t).unwrap();
        assert!((recovered - secret).abs() < 1e-5);
    }

    #[test]
    fn scalar_share_fails_quorum_short_below_threshold() {
        let n = 5;
        let t = threshold_for(n);
        let shares = share_scalar(-1.0, n, t);
        let result = reconstruct(&shares[..t - 1], t);
        assert!(matches!(result, Err(CoreError::QuorumShort { needed: 4, had: 3 })));
    }

    #[test]
    fn tensor_share_and_reconstruct_sum_round_trips() {
        let n = 5;
        let t = threshold_for(n);
        let a = WeightTensor::new(vec![vec![2.0_f32, -1.0]]);
        let b = WeightTensor::new(vec![vec![1.0_f32, 1.0]]);

        let shares_a = share_tensor(&a, n, t);
        let shares_b = share_tensor(&b, n, t);

        let combined: Vec<(u32, Vec<Layer>)> = (0..n)
            .map(|i| {
                let bundle = sum_shares_elementwise(&[shares_a[i].clone(), shares_b[i].clone()]);
                ((i + 1) as u32, bundle)
            })
            .collect();

        let aggregate = reconstruct_tensor_sum(&combined[..t], t, 2).unwrap();
        assert!((aggregate.layers[0][0] - 1.5).abs() < 1e-4); // (2.0 + 1.0) / 2
        assert!((aggregate.layers[0][1] - 0.0).abs() < 1e-4); // (-1.0 + 1.0) / 2
    }

    #[test]
    fn commit_is_deterministic_for_same_weights_and_nonce() {
        let weights = WeightTensor::new(vec![vec![1.0, 2.0]]);
        let (c1, p1) = commit(&weights, "nonce-a");
        let (c2, p2) = commit(&weights, "nonce-a");
        assert_eq!(c1, c2);
        assert_eq!(p1, p2);
        assert_eq!(c1.len(), 64);
        assert_eq!(p1.len(), 64);
    }
}
