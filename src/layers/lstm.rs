//! Recurrent LSTM layer.
//!
//! The layer owns four gate weight matrices (input, forget, output,
//! candidate), each applied to the concatenation `[x_t, h_{t-1}]`. Per time
//! step:
//!
//! ```text
//! i_t = sigmoid(W_i [x_t, h_{t-1}] + b_i)
//! f_t = sigmoid(W_f [x_t, h_{t-1}] + b_f)
//! o_t = sigmoid(W_o [x_t, h_{t-1}] + b_o)
//! g_t = tanh   (W_g [x_t, h_{t-1}] + b_g)
//! c_t = f_t * c_{t-1} + i_t * g_t
//! h_t = o_t * tanh(c_t)
//! ```
//!
//! Hidden and cell state are zero-initialized for every sequence and
//! threaded between steps as explicit `RecurrentState` values, so nothing
//! leaks across datapoints. The backward pass walks the cached steps in
//! reverse order (backpropagation through time), maintaining running
//! `dh_next`/`dc_next` gradients.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::layers::activation::ActivationKind;
use crate::utils::matrix;
use crate::utils::SimpleRng;

/// Hidden and cell state threaded from one time step to the next.
#[derive(Debug, Clone)]
pub struct RecurrentState {
    pub h: Vec<f32>,
    pub c: Vec<f32>,
}

impl RecurrentState {
    pub fn zeros(hidden_size: usize) -> Self {
        Self {
            h: vec![0.0f32; hidden_size],
            c: vec![0.0f32; hidden_size],
        }
    }
}

/// One gate: a weight matrix over `[x_t, h_{t-1}]`, a bias vector, and the
/// gradient accumulators for both.
#[derive(Debug, Serialize, Deserialize)]
struct Gate {
    weights: Vec<f32>, // hidden_size x (input_size + hidden_size), row-major
    biases: Vec<f32>,
    grad_weights: Vec<f32>,
    grad_biases: Vec<f32>,
}

impl Gate {
    fn new(concat_size: usize, hidden_size: usize, rng: &mut SimpleRng) -> Self {
        let limit = (6.0f32 / (concat_size + hidden_size) as f32).sqrt();
        let mut weights = vec![0.0f32; hidden_size * concat_size];
        for value in &mut weights {
            *value = rng.uniform(-limit, limit);
        }
        Self {
            weights,
            biases: vec![0.0f32; hidden_size],
            grad_weights: vec![0.0f32; hidden_size * concat_size],
            grad_biases: vec![0.0f32; hidden_size],
        }
    }

    /// `activation(W z + b)` element-wise.
    fn activate(&self, z: &[f32], hidden_size: usize, kind: ActivationKind) -> Vec<f32> {
        let mut out = vec![0.0f32; hidden_size];
        matrix::mat_vec(&self.weights, hidden_size, z.len(), z, &mut out);
        for (value, &bias) in out.iter_mut().zip(self.biases.iter()) {
            *value = kind.apply(*value + bias);
        }
        out
    }

    /// Accumulate `dW += d_pre ⊗ z`, `db += d_pre` and fold `Wᵀ d_pre` into
    /// the concatenated input gradient.
    fn accumulate(&mut self, d_pre: &[f32], z: &[f32], grad_z: &mut [f32]) {
        matrix::outer_acc(d_pre, z, &mut self.grad_weights);
        matrix::add_assign(&mut self.grad_biases, d_pre);
        matrix::mat_vec_transposed_acc(&self.weights, d_pre.len(), z.len(), d_pre, grad_z);
    }

    fn drain(&mut self) -> (Vec<f32>, Vec<f32>) {
        let gw = std::mem::replace(&mut self.grad_weights, vec![0.0f32; self.weights.len()]);
        let gb = std::mem::replace(&mut self.grad_biases, vec![0.0f32; self.biases.len()]);
        (gw, gb)
    }
}

/// Activations cached per time step for backpropagation through time.
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

/// Recurrent LSTM cell unrolled over a flattened input sequence.
///
/// The forward input is a flat vector of `sequence_len * input_size` values.
/// In constant-length mode the sequence length is fixed when the layer is
/// wired into a network; in variable-length mode any positive multiple of
/// `input_size` is accepted. The output is either the final hidden state
/// (`hidden_size` values) or, with `output_sequence`, every hidden state
/// concatenated (`sequence_len * hidden_size` values).
#[derive(Debug, Serialize, Deserialize)]
pub struct LstmLayer {
    input_size: usize,
    hidden_size: usize,
    constant_length: bool,
    sequence_len: Option<usize>,
    output_sequence: bool,
    input_gate: Gate,
    forget_gate: Gate,
    output_gate: Gate,
    candidate_gate: Gate,
    #[serde(skip)]
    cache: Option<Vec<StepCache>>,
}

impl LstmLayer {
    /// Create a constant-length cell producing only the final hidden state.
    /// `input_size` is the width of one time step.
    pub fn new(input_size: usize, hidden_size: usize, rng: &mut SimpleRng) -> Self {
        let concat = input_size + hidden_size;
        let mut forget_gate = Gate::new(concat, hidden_size, rng);
        // Forget bias starts at one so early training keeps cell state.
        for bias in &mut forget_gate.biases {
            *bias = 1.0;
        }

        Self {
            input_size,
            hidden_size,
            constant_length: true,
            sequence_len: None,
            output_sequence: false,
            input_gate: Gate::new(concat, hidden_size, rng),
            forget_gate,
            output_gate: Gate::new(concat, hidden_size, rng),
            candidate_gate: Gate::new(concat, hidden_size, rng),
            cache: None,
        }
    }

    /// Emit every hidden state instead of only the last one.
    pub fn output_sequence(mut self, yes: bool) -> Self {
        self.output_sequence = yes;
        self
    }

    /// Accept sequences of any positive length instead of a fixed window.
    pub fn variable_length(mut self) -> Self {
        self.constant_length = false;
        self.sequence_len = None;
        self
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn is_output_sequence(&self) -> bool {
        self.output_sequence
    }

    pub fn parameter_count(&self) -> usize {
        let concat = self.input_size + self.hidden_size;
        4 * (self.hidden_size * concat + self.hidden_size)
    }

    /// Resolve the sequence length against the width the previous layer
    /// produces; returns the width this layer produces (None when it depends
    /// on the runtime sequence length).
    pub fn wire(&mut self, incoming: Option<usize>) -> Result<Option<usize>, EngineError> {
        if let Some(width) = incoming {
            if width == 0 || width % self.input_size != 0 {
                return Err(EngineError::ShapeMismatch(format!(
                    "incoming width {} is not a positive multiple of the LSTM step size {}",
                    width, self.input_size
                )));
            }
            if self.constant_length {
                self.sequence_len = Some(width / self.input_size);
            }
        } else if self.constant_length {
            return Err(EngineError::ShapeMismatch(
                "a constant-length LSTM cannot follow a variable-length layer".to_string(),
            ));
        }

        Ok(match (self.output_sequence, self.sequence_len) {
            (false, _) => Some(self.hidden_size),
            (true, Some(len)) => Some(len * self.hidden_size),
            (true, None) => None,
        })
    }

    fn sequence_steps(&self, input_len: usize) -> Result<usize, EngineError> {
        if input_len == 0 || input_len % self.input_size != 0 {
            return Err(EngineError::ShapeMismatch(format!(
                "input of {} values is not a positive multiple of the LSTM step size {}",
                input_len, self.input_size
            )));
        }
        let steps = input_len / self.input_size;
        if let Some(expected) = self.sequence_len {
            if self.constant_length && steps != expected {
                return Err(EngineError::ShapeMismatch(format!(
                    "constant-length LSTM expects {} steps, got {}",
                    expected, steps
                )));
            }
        }
        Ok(steps)
    }

    /// One time step: consumes the previous state, returns the next state
    /// and the cached activations BPTT will need.
    fn step(&self, x_t: &[f32], state: RecurrentState) -> (RecurrentState, StepCache) {
        let mut z = Vec::with_capacity(self.input_size + self.hidden_size);
        z.extend_from_slice(x_t);
        z.extend_from_slice(&state.h);

        let i = self.input_gate.activate(&z, self.hidden_size, ActivationKind::Sigmoid);
        let f = self.forget_gate.activate(&z, self.hidden_size, ActivationKind::Sigmoid);
        let o = self.output_gate.activate(&z, self.hidden_size, ActivationKind::Sigmoid);
        let g = self
            .candidate_gate
            .activate(&z, self.hidden_size, ActivationKind::Tanh);

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
        (RecurrentState { h, c }, cache)
    }

    fn collect_output(&self, hidden_states: Vec<Vec<f32>>) -> Vec<f32> {
        if self.output_sequence {
            hidden_states.into_iter().flatten().collect()
        } else {
            hidden_states.into_iter().last().unwrap_or_default()
        }
    }

    /// Pure forward pass over the whole sequence, no caching.
    pub fn evaluate(&self, input: &[f32]) -> Result<Vec<f32>, EngineError> {
        let steps = self.sequence_steps(input.len())?;
        let mut state = RecurrentState::zeros(self.hidden_size);
        let mut hidden_states = Vec::with_capacity(steps);
        for x_t in input.chunks_exact(self.input_size).take(steps) {
            let (next, _) = self.step(x_t, state);
            hidden_states.push(next.h.clone());
            state = next;
        }
        Ok(self.collect_output(hidden_states))
    }

    /// Training forward pass. Fails with a state error if the cached
    /// activations of a previous forward were never consumed by backward.
    pub fn forward(&mut self, input: &[f32]) -> Result<Vec<f32>, EngineError> {
        if self.cache.is_some() {
            return Err(EngineError::StateMisuse(
                "LSTM forward called while cached activations are pending a backward"
                    .to_string(),
            ));
        }
        let steps = self.sequence_steps(input.len())?;

        let mut state = RecurrentState::zeros(self.hidden_size);
        let mut caches = Vec::with_capacity(steps);
        let mut hidden_states = Vec::with_capacity(steps);
        for x_t in input.chunks_exact(self.input_size).take(steps) {
            let (next, cache) = self.step(x_t, state);
            caches.push(cache);
            hidden_states.push(next.h.clone());
            state = next;
        }

        self.cache = Some(caches);
        Ok(self.collect_output(hidden_states))
    }

    /// Backpropagation through time. Walks the cached steps in reverse,
    /// seeds `dh_next`/`dc_next` with zeros at the last step, accumulates
    /// the gate gradients, and returns the gradient of the flattened input
    /// sequence.
    pub fn backward(&mut self, grad_output: &[f32]) -> Result<Vec<f32>, EngineError> {
        let caches = self.cache.take().ok_or_else(|| {
            EngineError::StateMisuse(
                "LSTM backward called without a preceding forward".to_string(),
            )
        })?;
        let steps = caches.len();
        let expected = if self.output_sequence {
            steps * self.hidden_size
        } else {
            self.hidden_size
        };
        if grad_output.len() != expected {
            return Err(EngineError::ShapeMismatch(format!(
                "LSTM expects output gradient of {}, got {}",
                expected,
                grad_output.len()
            )));
        }

        let hidden = self.hidden_size;
        let concat = self.input_size + hidden;
        let mut grad_input = vec![0.0f32; steps * self.input_size];
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
                d_o[j] = dh[j] * tc * cache.o[j] * (1.0 - cache.o[j]);
                d_f[j] = dc[j] * cache.c_prev[j] * cache.f[j] * (1.0 - cache.f[j]);
                d_i[j] = dc[j] * cache.g[j] * cache.i[j] * (1.0 - cache.i[j]);
                d_g[j] = dc[j] * cache.i[j] * (1.0 - cache.g[j] * cache.g[j]);
            }

            let mut grad_z = vec![0.0f32; concat];
            self.input_gate.accumulate(&d_i, &cache.z, &mut grad_z);
            self.forget_gate.accumulate(&d_f, &cache.z, &mut grad_z);
            self.output_gate.accumulate(&d_o, &cache.z, &mut grad_z);
            self.candidate_gate.accumulate(&d_g, &cache.z, &mut grad_z);

            grad_input[t * self.input_size..(t + 1) * self.input_size]
                .copy_from_slice(&grad_z[..self.input_size]);
            dh_next.copy_from_slice(&grad_z[self.input_size..]);
            for j in 0..hidden {
                dc_next[j] = dc[j] * cache.f[j];
            }
        }

        Ok(grad_input)
    }

    /// Mutable views of the eight parameter tensors, in drain order.
    pub fn parameters_mut(&mut self) -> Vec<&mut Vec<f32>> {
        vec![
            &mut self.input_gate.weights,
            &mut self.input_gate.biases,
            &mut self.forget_gate.weights,
            &mut self.forget_gate.biases,
            &mut self.output_gate.weights,
            &mut self.output_gate.biases,
            &mut self.candidate_gate.weights,
            &mut self.candidate_gate.biases,
        ]
    }

    /// Drain and zero the gradient accumulators; order matches
    /// `parameters_mut`.
    pub fn drain_gradients(&mut self) -> Vec<Vec<f32>> {
        let mut grads = Vec::with_capacity(8);
        for gate in [
            &mut self.input_gate,
            &mut self.forget_gate,
            &mut self.output_gate,
            &mut self.candidate_gate,
        ] {
            let (gw, gb) = gate.drain();
            grads.push(gw);
            grads.push(gb);
        }
        grads
    }
}
