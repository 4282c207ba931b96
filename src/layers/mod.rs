//! The closed layer set.
//!
//! The engine supports exactly three layer families, so dispatch goes
//! through a tagged enum rather than trait objects: the variants are known,
//! the match is exhaustive, and serialization of a heterogeneous layer list
//! falls out of the derive.

pub mod activation;
pub mod linear;
pub mod lstm;

pub use activation::{ActivationKind, ActivationLayer};
pub use linear::LinearLayer;
pub use lstm::{LstmLayer, RecurrentState};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::utils::SimpleRng;

/// A differentiable unit in a network: linear, element-wise activation, or
/// recurrent LSTM. All variants share the forward/backward/evaluate
/// contract: forward caches what backward needs, backward consumes that
/// cache and accumulates parameter gradients.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "layer_type", rename_all = "lowercase")]
pub enum Layer {
    Linear(LinearLayer),
    Activation(ActivationLayer),
    Lstm(LstmLayer),
}

impl Layer {
    /// Convenience constructor for a linear layer.
    pub fn linear(input_size: usize, output_size: usize, rng: &mut SimpleRng) -> Self {
        Layer::Linear(LinearLayer::new(input_size, output_size, rng))
    }

    pub fn relu() -> Self {
        Layer::Activation(ActivationLayer::new(ActivationKind::Relu))
    }

    pub fn tanh() -> Self {
        Layer::Activation(ActivationLayer::new(ActivationKind::Tanh))
    }

    pub fn lanh() -> Self {
        Layer::Activation(ActivationLayer::new(ActivationKind::Lanh))
    }

    pub fn sigmoid() -> Self {
        Layer::Activation(ActivationLayer::new(ActivationKind::Sigmoid))
    }

    /// Resolve this layer's shapes against the width the previous layer
    /// produces. Returns the width this layer produces; `None` means the
    /// width depends on the runtime sequence length.
    pub fn wire(&mut self, incoming: Option<usize>) -> Result<Option<usize>, EngineError> {
        match self {
            Layer::Linear(layer) => match incoming {
                Some(width) if width == layer.input_size() => Ok(Some(layer.output_size())),
                Some(width) => Err(EngineError::ShapeMismatch(format!(
                    "linear layer declares input {}, but the previous layer produces {}",
                    layer.input_size(),
                    width
                ))),
                None => Err(EngineError::ShapeMismatch(
                    "a linear layer cannot follow a variable-length layer".to_string(),
                )),
            },
            // Activations adopt whatever width flows in.
            Layer::Activation(_) => Ok(incoming),
            Layer::Lstm(layer) => layer.wire(incoming),
        }
    }

    /// Training forward pass; caches activations for backward.
    pub fn forward(&mut self, input: &[f32]) -> Result<Vec<f32>, EngineError> {
        match self {
            Layer::Linear(layer) => layer.forward(input),
            Layer::Activation(layer) => layer.forward(input),
            Layer::Lstm(layer) => layer.forward(input),
        }
    }

    /// Backward pass; accumulates parameter gradients and returns the
    /// gradient to pass upstream.
    pub fn backward(&mut self, grad_output: &[f32]) -> Result<Vec<f32>, EngineError> {
        match self {
            Layer::Linear(layer) => layer.backward(grad_output),
            Layer::Activation(layer) => layer.backward(grad_output),
            Layer::Lstm(layer) => layer.backward(grad_output),
        }
    }

    /// Pure forward pass with no gradient bookkeeping.
    pub fn evaluate(&self, input: &[f32]) -> Result<Vec<f32>, EngineError> {
        match self {
            Layer::Linear(layer) => layer.evaluate(input),
            Layer::Activation(layer) => layer.evaluate(input),
            Layer::Lstm(layer) => layer.evaluate(input),
        }
    }

    /// Mutable views of the trainable parameter tensors; empty for
    /// parameterless layers. Order is stable and matches
    /// `drain_gradients`.
    pub fn parameters_mut(&mut self) -> Vec<&mut Vec<f32>> {
        match self {
            Layer::Linear(layer) => layer.parameters_mut(),
            Layer::Activation(_) => Vec::new(),
            Layer::Lstm(layer) => layer.parameters_mut(),
        }
    }

    /// Drain the accumulated gradients, zeroing the internal buffers.
    pub fn drain_gradients(&mut self) -> Vec<Vec<f32>> {
        match self {
            Layer::Linear(layer) => layer.drain_gradients(),
            Layer::Activation(_) => Vec::new(),
            Layer::Lstm(layer) => layer.drain_gradients(),
        }
    }

    /// Number of trainable parameters.
    pub fn parameter_count(&self) -> usize {
        match self {
            Layer::Linear(layer) => layer.parameter_count(),
            Layer::Activation(_) => 0,
            Layer::Lstm(layer) => layer.parameter_count(),
        }
    }
}

impl From<LinearLayer> for Layer {
    fn from(layer: LinearLayer) -> Self {
        Layer::Linear(layer)
    }
}

impl From<ActivationLayer> for Layer {
    fn from(layer: ActivationLayer) -> Self {
        Layer::Activation(layer)
    }
}

impl From<LstmLayer> for Layer {
    fn from(layer: LstmLayer) -> Self {
        Layer::Lstm(layer)
    }
}
