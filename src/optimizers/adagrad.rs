//! AdaGrad: adaptive per-parameter learning rates.
//!
//! Each parameter accumulates the sum of its squared gradients; the step is
//! scaled down as that sum grows:
//!
//! ```text
//! acc += grad * grad            (element-wise)
//! param -= lr * grad / (sqrt(acc) + epsilon)
//! ```
//!
//! The accumulator is created lazily the first time a parameter tensor is
//! updated and persists across the whole training run; it is cleared only by
//! `reset`.

use std::collections::HashMap;

use crate::optimizers::Optimizer;

/// AdaGrad optimizer with a configurable stabilizing epsilon.
pub struct AdaGrad {
    learning_rate: f32,
    epsilon: f32,
    accumulators: HashMap<usize, Vec<f32>>,
}

impl AdaGrad {
    /// `epsilon` keeps the denominator away from zero before any gradient
    /// has accumulated; larger values also damp the first few steps.
    pub fn new(learning_rate: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            epsilon,
            accumulators: HashMap::new(),
        }
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    /// The squared-gradient accumulator for a parameter tensor, if that
    /// tensor has been updated at least once.
    pub fn accumulator(&self, key: usize) -> Option<&[f32]> {
        self.accumulators.get(&key).map(|acc| acc.as_slice())
    }
}

impl Optimizer for AdaGrad {
    fn update(&mut self, key: usize, parameters: &mut [f32], gradients: &[f32]) {
        assert_eq!(
            parameters.len(),
            gradients.len(),
            "parameters and gradients must have the same length"
        );

        let acc = self
            .accumulators
            .entry(key)
            .or_insert_with(|| vec![0.0f32; parameters.len()]);
        assert_eq!(
            acc.len(),
            parameters.len(),
            "parameter key reused with a different tensor size"
        );

        for ((param, &grad), slot) in parameters.iter_mut().zip(gradients).zip(acc.iter_mut()) {
            *slot += grad * grad;
            *param -= self.learning_rate * grad / (slot.sqrt() + self.epsilon);
        }
    }

    fn reset(&mut self) {
        self.accumulators.clear();
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.learning_rate = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_step_uses_gradient_magnitude() {
        let mut optimizer = AdaGrad::new(1.0, 0.0);
        let mut params = vec![0.0f32];
        optimizer.update(0, &mut params, &[4.0]);
        // acc = 16, step = 1.0 * 4 / sqrt(16) = 1.
        assert!((params[0] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_accumulator_matches_closed_form() {
        let mut optimizer = AdaGrad::new(0.5, 1e-8);
        let mut params = vec![1.0f32];
        let history = [0.5f32, -1.5, 2.0, 0.25];

        let mut expected_acc = 0.0f32;
        let mut expected_param = 1.0f32;
        for &g in &history {
            optimizer.update(3, &mut params, &[g]);
            expected_acc += g * g;
            expected_param -= 0.5 * g / (expected_acc.sqrt() + 1e-8);
        }

        assert!((optimizer.accumulator(3).unwrap()[0] - expected_acc).abs() < 1e-6);
        assert!((params[0] - expected_param).abs() < 1e-6);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut optimizer = AdaGrad::new(1.0, 1e-8);
        let mut a = vec![0.0f32];
        let mut b = vec![0.0f32];
        optimizer.update(0, &mut a, &[1.0]);
        optimizer.update(0, &mut a, &[1.0]);
        optimizer.update(1, &mut b, &[1.0]);

        assert!((optimizer.accumulator(0).unwrap()[0] - 2.0).abs() < 1e-6);
        assert!((optimizer.accumulator(1).unwrap()[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut optimizer = AdaGrad::new(1.0, 1e-8);
        let mut params = vec![0.0f32];
        optimizer.update(0, &mut params, &[1.0]);
        assert!(optimizer.accumulator(0).is_some());
        optimizer.reset();
        assert!(optimizer.accumulator(0).is_none());
    }

    #[test]
    #[should_panic(expected = "different tensor size")]
    fn test_key_reuse_with_wrong_size_panics() {
        let mut optimizer = AdaGrad::new(1.0, 1e-8);
        let mut params = vec![0.0f32; 2];
        optimizer.update(0, &mut params, &[1.0, 1.0]);
        let mut other = vec![0.0f32; 3];
        optimizer.update(0, &mut other, &[1.0, 1.0, 1.0]);
    }
}
