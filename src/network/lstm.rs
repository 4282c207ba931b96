//! Recurrent LSTM topology.
//!
//! Where `layers::LstmLayer` encapsulates the whole cell, this topology
//! expresses the recurrence explicitly: an outer loop walks the time steps
//! and invokes four inner networks (one per gate) on the concatenated
//! `[x_t, h]`, threading hidden/cell state between repetitions as explicit
//! `RecurrentState` values. The inner networks are ordinary `Sequential`
//! pipelines, by default a linear layer followed by the gate activation.
//!
//! Because an inner network caches only its most recent forward, the
//! backward pass re-runs each gate's forward for step t (a deterministic
//! recompute from the cached `[x_t, h]`) before driving its backward;
//! parameter gradients accumulate across those per-step calls exactly as
//! they do within a sub-batch.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::layers::{Layer, RecurrentState};
use crate::network::{Network, Sequential};
use crate::utils::matrix;
use crate::utils::SimpleRng;

#[derive(Debug)]
struct StepCache {
    z: Vec<f32>, // [x_t, h_{t-1}]
    i: Vec<f32>,
    f: Vec<f32>,
    o: Vec<f32>,
    g: Vec<f32>,
    c_prev: Vec<f32>,
    tanh_c: Vec<f32>,
}

/// Recurrent composition of four gate networks.
#[derive(Debug, Serialize, Deserialize)]
pub struct LstmNetwork {
    step_input: usize,
    hidden_size: usize,
    output_sequence: bool,
    sequence_len: Option<usize>,
    input_gate: Sequential,
    forget_gate: Sequential,
    output_gate: Sequential,
    candidate_gate: Sequential,
    #[serde(skip)]
    cache: Option<Vec<StepCache>>,
}

impl LstmNetwork {
    /// Build the standard composition: each gate is a linear layer over
    /// `[x_t, h]` followed by its activation (sigmoid for the input, forget
    /// and output gates, tanh for the candidate). Accepts variable-length
    /// sequences and emits the final hidden state unless configured
    /// otherwise.
    pub fn new(
        step_input: usize,
        hidden_size: usize,
        rng: &mut SimpleRng,
    ) -> Result<Self, EngineError> {
        if step_input == 0 || hidden_size == 0 {
            return Err(EngineError::ShapeMismatch(
                "LSTM step input and hidden size must be greater than 0".to_string(),
            ));
        }
        let concat = step_input + hidden_size;
        let sigmoid_gate = |rng: &mut SimpleRng| {
            Sequential::initialize(
                concat,
                vec![Layer::linear(concat, hidden_size, rng), Layer::sigmoid()],
            )
        };

        Ok(Self {
            step_input,
            hidden_size,
            output_sequence: false,
            sequence_len: None,
            input_gate: sigmoid_gate(rng)?,
            forget_gate: sigmoid_gate(rng)?,
            output_gate: sigmoid_gate(rng)?,
            candidate_gate: Sequential::initialize(
                concat,
                vec![Layer::linear(concat, hidden_size, rng), Layer::tanh()],
            )?,
            cache: None,
        })
    }

    /// Replace the default gate pipelines with caller-built networks. Each
    /// gate must map `step_input + hidden_size` values to `hidden_size`.
    pub fn from_gates(
        step_input: usize,
        hidden_size: usize,
        input_gate: Sequential,
        forget_gate: Sequential,
        output_gate: Sequential,
        candidate_gate: Sequential,
    ) -> Result<Self, EngineError> {
        let concat = step_input + hidden_size;
        for (name, gate) in [
            ("input", &input_gate),
            ("forget", &forget_gate),
            ("output", &output_gate),
            ("candidate", &candidate_gate),
        ] {
            gate.check_input_len(concat).map_err(|err| match err {
                EngineError::ShapeMismatch(msg) => {
                    EngineError::ShapeMismatch(format!("{} gate: {}", name, msg))
                }
                other => other,
            })?;
            if gate.output_size() != Some(hidden_size) {
                return Err(EngineError::ShapeMismatch(format!(
                    "{} gate must produce {} values, produces {:?}",
                    name,
                    hidden_size,
                    gate.output_size()
                )));
            }
        }

        Ok(Self {
            step_input,
            hidden_size,
            output_sequence: false,
            sequence_len: None,
            input_gate,
            forget_gate,
            output_gate,
            candidate_gate,
            cache: None,
        })
    }

    /// Emit every hidden state instead of only the last one.
    pub fn output_sequence(mut self, yes: bool) -> Self {
        self.output_sequence = yes;
        self
    }

    /// Require exactly `steps` time steps per sequence.
    pub fn fixed_length(mut self, steps: usize) -> Self {
        self.sequence_len = Some(steps);
        self
    }

    pub fn step_input(&self) -> usize {
        self.step_input
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn sequence_steps(&self, input_len: usize) -> Result<usize, EngineError> {
        if input_len == 0 || input_len % self.step_input != 0 {
            return Err(EngineError::ShapeMismatch(format!(
                "input of {} values is not a positive multiple of the step size {}",
                input_len, self.step_input
            )));
        }
        let steps = input_len / self.step_input;
        if let Some(expected) = self.sequence_len {
            if steps != expected {
                return Err(EngineError::ShapeMismatch(format!(
                    "fixed-length topology expects {} steps, got {}",
                    expected, steps
                )));
            }
        }
        Ok(steps)
    }

    fn step(&self, x_t: &[f32], state: RecurrentState) -> Result<(RecurrentState, StepCache), EngineError> {
        let mut z = Vec::with_capacity(self.step_input + self.hidden_size);
        z.extend_from_slice(x_t);
        z.extend_from_slice(&state.h);

        let i = self.input_gate.evaluate(&z)?;
        let f = self.forget_gate.evaluate(&z)?;
        let o = self.output_gate.evaluate(&z)?;
        let g = self.candidate_gate.evaluate(&z)?;

        let mut c = vec![0.0f32; self.hidden_size];
        let mut tanh_c = vec![0.0f32; self.hidden_size];
        let mut h = vec![0.0f32; self.hidden_size];
        for j in 0..self.hidden_size {
            c[j] = f[j] * state.c[j] + i[j] * g[j];
            tanh_c[j] = c[j].tanh();
            h[j] = o[j] * tanh_c[j];
        }

        let cache = StepCache {
            z,
            i,
            f,
            o,
            g,
            c_prev: state.c,
            tanh_c: tanh_c.clone(),
        };
        Ok((RecurrentState { h, c }, cache))
    }

    fn collect_output(&self, hidden_states: Vec<Vec<f32>>) -> Vec<f32> {
        if self.output_sequence {
            hidden_states.into_iter().flatten().collect()
        } else {
            hidden_states.into_iter().last().unwrap_or_default()
        }
    }

    fn run(&self, input: &[f32]) -> Result<(Vec<Vec<f32>>, Vec<StepCache>), EngineError> {
        let steps = self.sequence_steps(input.len())?;
        let mut state = RecurrentState::zeros(self.hidden_size);
        let mut caches = Vec::with_capacity(steps);
        let mut hidden_states = Vec::with_capacity(steps);
        for x_t in input.chunks_exact(self.step_input).take(steps) {
            let (next, cache) = self.step(x_t, state)?;
            caches.push(cache);
            hidden_states.push(next.h.clone());
            state = next;
        }
        Ok((hidden_states, caches))
    }
}

impl Network for LstmNetwork {
    fn output_size(&self) -> Option<usize> {
        match (self.output_sequence, self.sequence_len) {
            (false, _) => Some(self.hidden_size),
            (true, Some(len)) => Some(len * self.hidden_size),
            (true, None) => None,
        }
    }

    fn check_input_len(&self, len: usize) -> Result<(), EngineError> {
        self.sequence_steps(len).map(|_| ())
    }

    fn forward(&mut self, input: &[f32]) -> Result<Vec<f32>, EngineError> {
        if self.cache.is_some() {
            return Err(EngineError::StateMisuse(
                "LSTM topology forward called while cached activations are pending a backward"
                    .to_string(),
            ));
        }
        let (hidden_states, caches) = self.run(input)?;
        self.cache = Some(caches);
        Ok(self.collect_output(hidden_states))
    }

    fn backward(&mut self, grad_output: &[f32]) -> Result<Vec<f32>, EngineError> {
        let caches = self.cache.take().ok_or_else(|| {
            EngineError::StateMisuse(
                "LSTM topology backward called without a preceding forward".to_string(),
            )
        })?;
        let steps = caches.len();
        let hidden = self.hidden_size;
        let expected = if self.output_sequence {
            steps * hidden
        } else {
            hidden
        };
        if grad_output.len() != expected {
            return Err(EngineError::ShapeMismatch(format!(
                "LSTM topology expects output gradient of {}, got {}",
                expected,
                grad_output.len()
            )));
        }

        let mut grad_input = vec![0.0f32; steps * self.step_input];
        let mut dh_next = vec![0.0f32; hidden];
        let mut dc_next = vec![0.0f32; hidden];

        let mut dh = vec![0.0f32; hidden];
        let mut dc = vec![0.0f32; hidden];
        let mut d_i = vec![0.0f32; hidden];
        let mut d_f = vec![0.0f32; hidden];
        let mut d_o = vec![0.0f32; hidden];
        let mut d_g = vec![0.0f32; hidden];

        for (t, cache) in caches.iter().enumerate().rev() {
            dh.copy_from_slice(&dh_next);
            if self.output_sequence {
                matrix::add_assign(&mut dh, &grad_output[t * hidden..(t + 1) * hidden]);
            } else if t == steps - 1 {
                matrix::add_assign(&mut dh, grad_output);
            }

            for j in 0..hidden {
                let tc = cache.tanh_c[j];
                dc[j] = dc_next[j] + dh[j] * cache.o[j] * (1.0 - tc * tc);
                d_o[j] = dh[j] * tc;
                d_f[j] = dc[j] * cache.c_prev[j];
                d_i[j] = dc[j] * cache.g[j];
                d_g[j] = dc[j] * cache.i[j];
            }

            // Re-prime each gate's single-slot cache for step t, then drive
            // its backward; the gate's own layers apply the activation
            // derivatives and accumulate their parameter gradients.
            let mut grad_z = vec![0.0f32; self.step_input + hidden];
            for (gate, d_gate) in [
                (&mut self.input_gate, &d_i),
                (&mut self.forget_gate, &d_f),
                (&mut self.output_gate, &d_o),
                (&mut self.candidate_gate, &d_g),
            ] {
                gate.forward(&cache.z)?;
                let dz = gate.backward(d_gate)?;
                matrix::add_assign(&mut grad_z, &dz);
            }

            grad_input[t * self.step_input..(t + 1) * self.step_input]
                .copy_from_slice(&grad_z[..self.step_input]);
            dh_next.copy_from_slice(&grad_z[self.step_input..]);
            for j in 0..hidden {
                dc_next[j] = dc[j] * cache.f[j];
            }
        }

        Ok(grad_input)
    }

    fn evaluate(&self, input: &[f32]) -> Result<Vec<f32>, EngineError> {
        let (hidden_states, _) = self.run(input)?;
        Ok(self.collect_output(hidden_states))
    }

    fn parameters_mut(&mut self) -> Vec<&mut Vec<f32>> {
        let mut params = self.input_gate.parameters_mut();
        params.extend(self.forget_gate.parameters_mut());
        params.extend(self.output_gate.parameters_mut());
        params.extend(self.candidate_gate.parameters_mut());
        params
    }

    fn drain_gradients(&mut self) -> Vec<Vec<f32>> {
        let mut grads = self.input_gate.drain_gradients();
        grads.extend(self.forget_gate.drain_gradients());
        grads.extend(self.output_gate.drain_gradients());
        grads.extend(self.candidate_gate.drain_gradients());
        grads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_topology() -> LstmNetwork {
        let mut rng = SimpleRng::new(21);
        LstmNetwork::new(2, 3, &mut rng).unwrap()
    }

    #[test]
    fn test_output_widths() {
        let mut net = small_topology();
        let out = net.forward(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(out.len(), 3);
        net.backward(&[0.0; 3]).unwrap();

        let mut net = small_topology().output_sequence(true);
        let out = net.forward(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(out.len(), 6);
        let grad_in = net.backward(&[0.0; 6]).unwrap();
        assert_eq!(grad_in.len(), 4);
    }

    #[test]
    fn test_fixed_length_enforced() {
        let mut net = small_topology().fixed_length(2);
        assert!(net.forward(&[0.1; 4]).is_ok());
        net.backward(&[0.0; 3]).unwrap();
        assert!(net.forward(&[0.1; 6]).is_err());
        assert_eq!(net.output_size(), Some(3));
    }

    #[test]
    fn test_rejects_ragged_input() {
        let mut net = small_topology();
        assert!(matches!(
            net.forward(&[1.0, 2.0, 3.0]),
            Err(EngineError::ShapeMismatch(_))
        ));
        assert!(net.check_input_len(0).is_err());
    }

    #[test]
    fn test_evaluate_matches_forward() {
        let mut net = small_topology();
        let input = [0.3, -0.2, 0.1, 0.4];
        let pure = net.evaluate(&input).unwrap();
        let cached = net.forward(&input).unwrap();
        assert_eq!(pure, cached);
        net.backward(&[0.0; 3]).unwrap();
    }

    #[test]
    fn test_state_misuse_detected() {
        let mut net = small_topology();
        assert!(matches!(
            net.backward(&[0.0; 3]),
            Err(EngineError::StateMisuse(_))
        ));
        net.forward(&[0.1, 0.2]).unwrap();
        assert!(matches!(
            net.forward(&[0.1, 0.2]),
            Err(EngineError::StateMisuse(_))
        ));
    }

    #[test]
    fn test_from_gates_validates_shapes() {
        let mut rng = SimpleRng::new(3);
        let good = |rng: &mut SimpleRng| {
            Sequential::initialize(5, vec![Layer::linear(5, 3, rng), Layer::sigmoid()]).unwrap()
        };
        let bad = Sequential::initialize(
            5,
            vec![Layer::linear(5, 2, &mut rng), Layer::sigmoid()],
        )
        .unwrap();

        let result = LstmNetwork::from_gates(
            2,
            3,
            good(&mut rng),
            good(&mut rng),
            good(&mut rng),
            bad,
        );
        assert!(matches!(result, Err(EngineError::ShapeMismatch(_))));
    }

    #[test]
    fn test_parameter_tensor_count() {
        let mut net = small_topology();
        // Four gates, each one linear layer: weights + biases.
        assert_eq!(net.parameters_mut().len(), 8);
        assert_eq!(net.drain_gradients().len(), 8);
    }
}
