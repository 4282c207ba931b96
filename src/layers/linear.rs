//! Linear (fully connected) layer.
//!
//! Computes `y = W x + b` with a row-major weight matrix of shape
//! (output_size x input_size). The layer caches the input of its most recent
//! training forward and accumulates parameter gradients across backward
//! calls until the trainer drains them.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::utils::matrix;
use crate::utils::SimpleRng;

/// Fully connected layer with weights and biases.
///
/// Weights are Xavier-initialized: uniform in [-limit, limit] with
/// limit = sqrt(6 / (input_size + output_size)). Biases start at zero.
#[derive(Debug, Serialize, Deserialize)]
pub struct LinearLayer {
    input_size: usize,
    output_size: usize,
    weights: Vec<f32>,
    biases: Vec<f32>,
    grad_weights: Vec<f32>,
    grad_biases: Vec<f32>,
    #[serde(skip)]
    cached_input: Option<Vec<f32>>,
}

impl LinearLayer {
    pub fn new(input_size: usize, output_size: usize, rng: &mut SimpleRng) -> Self {
        let limit = (6.0f32 / (input_size + output_size) as f32).sqrt();
        let mut weights = vec![0.0f32; input_size * output_size];
        for value in &mut weights {
            *value = rng.uniform(-limit, limit);
        }

        Self {
            input_size,
            output_size,
            weights,
            biases: vec![0.0f32; output_size],
            grad_weights: vec![0.0f32; input_size * output_size],
            grad_biases: vec![0.0f32; output_size],
            cached_input: None,
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Total number of trainable parameters (weights plus biases).
    pub fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn biases(&self) -> &[f32] {
        &self.biases
    }

    fn check_input(&self, len: usize) -> Result<(), EngineError> {
        if len != self.input_size {
            return Err(EngineError::ShapeMismatch(format!(
                "linear layer expects input of {}, got {}",
                self.input_size, len
            )));
        }
        Ok(())
    }

    /// Pure forward pass: no caching, no gradient bookkeeping.
    pub fn evaluate(&self, input: &[f32]) -> Result<Vec<f32>, EngineError> {
        self.check_input(input.len())?;
        let mut output = self.biases.clone();
        for (value, row) in output
            .iter_mut()
            .zip(self.weights.chunks_exact(self.input_size))
        {
            *value += matrix::dot(row, input);
        }
        Ok(output)
    }

    /// Training forward pass; caches the input for the matching backward.
    pub fn forward(&mut self, input: &[f32]) -> Result<Vec<f32>, EngineError> {
        let output = self.evaluate(input)?;
        self.cached_input = Some(input.to_vec());
        Ok(output)
    }

    /// Backward pass: accumulates `dW += dy ⊗ x` and `db += dy`, returns
    /// `dx = Wᵀ dy`. Consumes the cached input of the most recent forward.
    pub fn backward(&mut self, grad_output: &[f32]) -> Result<Vec<f32>, EngineError> {
        if grad_output.len() != self.output_size {
            return Err(EngineError::ShapeMismatch(format!(
                "linear layer expects output gradient of {}, got {}",
                self.output_size,
                grad_output.len()
            )));
        }
        let input = self.cached_input.take().ok_or_else(|| {
            EngineError::StateMisuse(
                "linear backward called without a preceding forward".to_string(),
            )
        })?;

        matrix::outer_acc(grad_output, &input, &mut self.grad_weights);
        matrix::add_assign(&mut self.grad_biases, grad_output);

        let mut grad_input = vec![0.0f32; self.input_size];
        matrix::mat_vec_transposed_acc(
            &self.weights,
            self.output_size,
            self.input_size,
            grad_output,
            &mut grad_input,
        );
        Ok(grad_input)
    }

    /// Mutable views of the parameter tensors, in drain order.
    pub fn parameters_mut(&mut self) -> Vec<&mut Vec<f32>> {
        vec![&mut self.weights, &mut self.biases]
    }

    /// Hand the accumulated gradients to the caller and zero the internal
    /// buffers. Order matches `parameters_mut`.
    pub fn drain_gradients(&mut self) -> Vec<Vec<f32>> {
        let gw = std::mem::replace(&mut self.grad_weights, vec![0.0f32; self.weights.len()]);
        let gb = std::mem::replace(&mut self.grad_biases, vec![0.0f32; self.biases.len()]);
        vec![gw, gb]
    }
}
