use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// One layer of a model's weights, stored flat (spec §3).
pub type Layer = Vec<f32>;

/// A full model's weights, one `Layer` per named parameter group.
///
/// Shape is carried implicitly by `layers[i].len()`; callers that need to
/// compare shapes across two tensors should use [`WeightTensor::shape`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightTensor {
    pub layers: Vec<Layer>,
}

impl WeightTensor {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    pub fn zeros_like(other: &WeightTensor) -> Self {
        Self {
            layers: other
                .layers
                .iter()
                .map(|layer| vec![0.0_f32; layer.len()])
                .collect(),
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        self.layers.iter().map(|l| l.len()).collect()
    }

    pub fn assert_same_shape(&self, other: &WeightTensor) -> CoreResult<()> {
        let (expected, actual) = (self.shape(), other.shape());
        if expected != actual {
            return Err(CoreError::ShapeMismatch { expected, actual });
        }
        Ok(())
    }

    /// Euclidean (L2) norm over every scalar in every layer, used by
    /// gradient clipping (spec §4.A).
    pub fn l2_norm(&self) -> f64 {
        self.layers
            .iter()
            .flat_map(|layer| layer.iter())
            .map(|&v| (v as f64) * (v as f64))
            .sum::<f64>()
            .sqrt()
    }

    /// Scales every scalar by `factor` in place.
    pub fn scale(&mut self, factor: f64) {
        for layer in &mut self.layers {
            for v in layer.iter_mut() {
                *v = (*v as f64 * factor) as f32;
            }
        }
    }

    pub fn add_assign(&mut self, other: &WeightTensor) -> CoreResult<()> {
        self.assert_same_shape(other)?;
        for (la, lb) in self.layers.iter_mut().zip(other.layers.iter()) {
            for (a, b) in la.iter_mut().zip(lb.iter()) {
                *a += *b;
            }
        }
        Ok(())
    }

    pub fn total_params(&self) -> usize {
        self.layers.iter().map(|l| l.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_norm_of_unit_vector() {
        let t = WeightTensor::new(vec![vec![3.0, 4.0]]);
        assert!((t.l2_norm() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn shape_mismatch_detected() {
        let a = WeightTensor::new(vec![vec![1.0, 2.0]]);
        let b = WeightTensor::new(vec![vec![1.0]]);
        assert!(a.assert_same_shape(&b).is_err());
    }

    #[test]
    fn scale_halves_every_value() {
        let mut t = WeightTensor::new(vec![vec![2.0, 4.0]]);
        t.scale(0.5);
        assert_eq!(t.layers[0], vec![1.0, 2.0]);
    }
}
