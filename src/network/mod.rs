//! Network topologies.
//!
//! A network is an ordered, shape-checked composition of layers behind one
//! differentiable forward/backward surface. Two topologies are provided:
//! `Sequential` (plain feed-forward piping) and `LstmNetwork` (an explicit
//! recurrent composition, see `network::lstm`).

pub mod lstm;

pub use lstm::LstmNetwork;

use serde::{Deserialize, Serialize};

use crate::dataset::DataPoint;
use crate::error::EngineError;
use crate::layers::Layer;
use crate::training::mse_loss;

/// The surface the trainer and evaluation flows talk to.
///
/// `forward`/`backward` are the training pair: forward caches activations,
/// backward consumes them and accumulates parameter gradients. `evaluate`
/// is the pure inference path.
pub trait Network {
    /// Output width, when it is statically known.
    fn output_size(&self) -> Option<usize>;

    /// Validate one input vector's length against the network's shape.
    fn check_input_len(&self, len: usize) -> Result<(), EngineError>;

    fn forward(&mut self, input: &[f32]) -> Result<Vec<f32>, EngineError>;

    fn backward(&mut self, grad_output: &[f32]) -> Result<Vec<f32>, EngineError>;

    fn evaluate(&self, input: &[f32]) -> Result<Vec<f32>, EngineError>;

    /// Mutable views of every trainable parameter tensor, in a stable order
    /// that matches `drain_gradients`.
    fn parameters_mut(&mut self) -> Vec<&mut Vec<f32>>;

    /// Drain the accumulated gradients of every layer, zeroing them.
    fn drain_gradients(&mut self) -> Vec<Vec<f32>>;

    /// Mean loss over a dataset, printed and returned. Pure read: no
    /// parameter or cache mutation.
    fn test_on_and_log(&self, dataset: &[DataPoint]) -> Result<f32, EngineError> {
        if dataset.is_empty() {
            return Err(EngineError::ShapeMismatch(
                "cannot evaluate an empty dataset".to_string(),
            ));
        }
        let mut total = 0.0f64;
        for point in dataset {
            let output = self.evaluate(&point.input)?;
            if output.len() != point.target.len() {
                return Err(EngineError::ShapeMismatch(format!(
                    "network produced {} outputs for a target of {}",
                    output.len(),
                    point.target.len()
                )));
            }
            total += mse_loss(&output, &point.target) as f64;
        }
        let mean = (total / dataset.len() as f64) as f32;
        println!("Mean loss over {} points: {:.6}", dataset.len(), mean);
        Ok(mean)
    }
}

/// Feed-forward composition: the input is piped through each layer in
/// order. The shape chain (output of layer i equals the declared input of
/// layer i+1) is validated once at `initialize` and never reshaped.
#[derive(Debug, Serialize, Deserialize)]
pub struct Sequential {
    input_size: usize,
    output_size: Option<usize>,
    layers: Vec<Layer>,
}

impl Sequential {
    /// Build and shape-check a layer pipeline starting from `input_size`.
    pub fn initialize(input_size: usize, mut layers: Vec<Layer>) -> Result<Self, EngineError> {
        if input_size == 0 {
            return Err(EngineError::ShapeMismatch(
                "network input size must be greater than 0".to_string(),
            ));
        }
        if layers.is_empty() {
            return Err(EngineError::ShapeMismatch(
                "a network must have at least one layer".to_string(),
            ));
        }

        let mut width = Some(input_size);
        for (i, layer) in layers.iter_mut().enumerate() {
            width = layer.wire(width).map_err(|err| match err {
                EngineError::ShapeMismatch(msg) => {
                    EngineError::ShapeMismatch(format!("layer {}: {}", i, msg))
                }
                other => other,
            })?;
        }

        Ok(Self {
            input_size,
            output_size: width,
            layers,
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Total number of trainable parameters across all layers.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(Layer::parameter_count).sum()
    }
}

impl Network for Sequential {
    fn output_size(&self) -> Option<usize> {
        self.output_size
    }

    fn check_input_len(&self, len: usize) -> Result<(), EngineError> {
        if len != self.input_size {
            return Err(EngineError::ShapeMismatch(format!(
                "network expects input of {}, got {}",
                self.input_size, len
            )));
        }
        Ok(())
    }

    fn forward(&mut self, input: &[f32]) -> Result<Vec<f32>, EngineError> {
        self.check_input_len(input.len())?;
        let mut value = input.to_vec();
        for layer in &mut self.layers {
            value = layer.forward(&value)?;
        }
        Ok(value)
    }

    fn backward(&mut self, grad_output: &[f32]) -> Result<Vec<f32>, EngineError> {
        let mut grad = grad_output.to_vec();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }
        Ok(grad)
    }

    fn evaluate(&self, input: &[f32]) -> Result<Vec<f32>, EngineError> {
        self.check_input_len(input.len())?;
        let mut value = input.to_vec();
        for layer in &self.layers {
            value = layer.evaluate(&value)?;
        }
        Ok(value)
    }

    fn parameters_mut(&mut self) -> Vec<&mut Vec<f32>> {
        self.layers
            .iter_mut()
            .flat_map(Layer::parameters_mut)
            .collect()
    }

    fn drain_gradients(&mut self) -> Vec<Vec<f32>> {
        self.layers
            .iter_mut()
            .flat_map(Layer::drain_gradients)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::SimpleRng;

    fn two_layer() -> Sequential {
        let mut rng = SimpleRng::new(11);
        Sequential::initialize(
            3,
            vec![
                Layer::linear(3, 4, &mut rng),
                Layer::relu(),
                Layer::linear(4, 2, &mut rng),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_initialize_resolves_output_size() {
        let net = two_layer();
        assert_eq!(net.input_size(), 3);
        assert_eq!(net.output_size(), Some(2));
        assert_eq!(net.parameter_count(), 3 * 4 + 4 + 4 * 2 + 2);
    }

    #[test]
    fn test_initialize_rejects_broken_chain() {
        let mut rng = SimpleRng::new(11);
        let err = Sequential::initialize(
            3,
            vec![Layer::linear(3, 4, &mut rng), Layer::linear(5, 2, &mut rng)],
        )
        .unwrap_err();
        assert!(err.to_string().contains("layer 1"));
    }

    #[test]
    fn test_initialize_rejects_empty() {
        assert!(Sequential::initialize(3, Vec::new()).is_err());
        let mut rng = SimpleRng::new(11);
        assert!(Sequential::initialize(0, vec![Layer::linear(1, 1, &mut rng)]).is_err());
    }

    #[test]
    fn test_forward_backward_round() {
        let mut net = two_layer();
        let out = net.forward(&[0.5, -0.5, 1.0]).unwrap();
        assert_eq!(out.len(), 2);
        let grad_in = net.backward(&[1.0, -1.0]).unwrap();
        assert_eq!(grad_in.len(), 3);
    }

    #[test]
    fn test_evaluate_matches_forward_and_stays_pure() {
        let mut net = two_layer();
        let input = [0.1, 0.2, 0.3];
        let pure = net.evaluate(&input).unwrap();
        let cached = net.forward(&input).unwrap();
        assert_eq!(pure, cached);
        // evaluate left no caches behind, so only the forward's backward works
        net.backward(&[0.0, 0.0]).unwrap();
        assert!(net.backward(&[0.0, 0.0]).is_err());
    }

    #[test]
    fn test_input_length_is_checked() {
        let mut net = two_layer();
        assert!(matches!(
            net.forward(&[1.0]),
            Err(EngineError::ShapeMismatch(_))
        ));
        assert!(net.evaluate(&[1.0]).is_err());
    }
}
