//! Element-wise activation layers.
//!
//! Activations own no parameters; they apply a scalar function and, on the
//! backward pass, its closed-form derivative evaluated at the cached input.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

// Lanh is the bounded scaled squashing 1.7159 * tanh(2x/3).
const LANH_GAIN: f32 = 1.7159;
const LANH_SLOPE: f32 = 2.0 / 3.0;

/// The supported element-wise functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationKind {
    Relu,
    Tanh,
    Lanh,
    Sigmoid,
}

impl ActivationKind {
    /// f(x)
    pub fn apply(self, x: f32) -> f32 {
        match self {
            ActivationKind::Relu => x.max(0.0),
            ActivationKind::Tanh => x.tanh(),
            ActivationKind::Lanh => LANH_GAIN * (LANH_SLOPE * x).tanh(),
            ActivationKind::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }

    /// f'(x), evaluated at the pre-activation input.
    pub fn derivative(self, x: f32) -> f32 {
        match self {
            ActivationKind::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ActivationKind::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            ActivationKind::Lanh => {
                let t = (LANH_SLOPE * x).tanh();
                LANH_GAIN * LANH_SLOPE * (1.0 - t * t)
            }
            ActivationKind::Sigmoid => {
                let s = ActivationKind::Sigmoid.apply(x);
                s * (1.0 - s)
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ActivationKind::Relu => "relu",
            ActivationKind::Tanh => "tanh",
            ActivationKind::Lanh => "lanh",
            ActivationKind::Sigmoid => "sigmoid",
        }
    }
}

/// Stateless layer applying an `ActivationKind` element-wise.
///
/// The layer adopts whatever width the previous layer produces; the only
/// state is the cached input of the most recent training forward.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActivationLayer {
    kind: ActivationKind,
    #[serde(skip)]
    cached_input: Option<Vec<f32>>,
}

impl ActivationLayer {
    pub fn new(kind: ActivationKind) -> Self {
        Self {
            kind,
            cached_input: None,
        }
    }

    pub fn kind(&self) -> ActivationKind {
        self.kind
    }

    pub fn evaluate(&self, input: &[f32]) -> Result<Vec<f32>, EngineError> {
        Ok(input.iter().map(|&x| self.kind.apply(x)).collect())
    }

    pub fn forward(&mut self, input: &[f32]) -> Result<Vec<f32>, EngineError> {
        let output = self.evaluate(input)?;
        self.cached_input = Some(input.to_vec());
        Ok(output)
    }

    /// `dx_i = dy_i * f'(x_i)` using the cached forward input.
    pub fn backward(&mut self, grad_output: &[f32]) -> Result<Vec<f32>, EngineError> {
        let input = self.cached_input.take().ok_or_else(|| {
            EngineError::StateMisuse(format!(
                "{} backward called without a preceding forward",
                self.kind.name()
            ))
        })?;
        if grad_output.len() != input.len() {
            return Err(EngineError::ShapeMismatch(format!(
                "{} layer expects output gradient of {}, got {}",
                self.kind.name(),
                input.len(),
                grad_output.len()
            )));
        }

        Ok(grad_output
            .iter()
            .zip(input.iter())
            .map(|(&dy, &x)| dy * self.kind.derivative(x))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu_values() {
        assert_eq!(ActivationKind::Relu.apply(-2.0), 0.0);
        assert_eq!(ActivationKind::Relu.apply(0.0), 0.0);
        assert_eq!(ActivationKind::Relu.apply(3.5), 3.5);
        assert_eq!(ActivationKind::Relu.derivative(-1.0), 0.0);
        assert_eq!(ActivationKind::Relu.derivative(0.0), 0.0);
        assert_eq!(ActivationKind::Relu.derivative(1.0), 1.0);
    }

    #[test]
    fn test_tanh_derivative_identity() {
        for &x in &[-3.0f32, -0.5, 0.0, 0.5, 3.0] {
            let f = ActivationKind::Tanh.apply(x);
            let expected = 1.0 - f * f;
            assert!((ActivationKind::Tanh.derivative(x) - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_lanh_is_bounded() {
        assert!(ActivationKind::Lanh.apply(100.0) <= LANH_GAIN + 1e-6);
        assert!(ActivationKind::Lanh.apply(-100.0) >= -LANH_GAIN - 1e-6);
        // Steepest at the origin.
        assert!(
            ActivationKind::Lanh.derivative(0.0) > ActivationKind::Lanh.derivative(1.0)
        );
    }

    #[test]
    fn test_sigmoid_midpoint() {
        assert!((ActivationKind::Sigmoid.apply(0.0) - 0.5).abs() < 1e-7);
        assert!((ActivationKind::Sigmoid.derivative(0.0) - 0.25).abs() < 1e-7);
    }

    #[test]
    fn test_layer_forward_backward() {
        let mut layer = ActivationLayer::new(ActivationKind::Relu);
        let out = layer.forward(&[-1.0, 2.0]).unwrap();
        assert_eq!(out, vec![0.0, 2.0]);
        let dx = layer.backward(&[1.0, 1.0]).unwrap();
        assert_eq!(dx, vec![0.0, 1.0]);
    }

    #[test]
    fn test_backward_without_forward() {
        let mut layer = ActivationLayer::new(ActivationKind::Tanh);
        assert!(matches!(
            layer.backward(&[1.0]),
            Err(EngineError::StateMisuse(_))
        ));
    }
}
