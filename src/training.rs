//! Mini-batched training loop.
//!
//! The trainer pulls batches of (input, target) pairs, splits each batch
//! into sub-batches, runs forward/backward per datapoint, and accumulates
//! gradients in explicit per-batch buffers; one optimizer step is applied
//! per full batch. The sub-batch split only bounds the peak memory of
//! recurrent unrolling; it never changes the effective batch size.
//!
//! Gradients are summed over the whole batch and scaled once by
//! `1 / batch_len` (mean reduction) immediately before the optimizer step,
//! so splitting a batch into sub-batches produces exactly the same update
//! as processing it unsplit.
//!
//! The wall-clock budget and the cooperative cancel flag are checked
//! between batches only; a batch in progress always completes.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{validate_config, TrainingConfig};
use crate::dataset::{check_dimensions, DataPoint};
use crate::error::EngineError;
use crate::network::Network;
use crate::optimizers::Optimizer;
use crate::utils::matrix;
use crate::utils::SimpleRng;

/// Half sum-of-squared-error of one prediction: `½ Σ (y_i - t_i)²`.
pub fn mse_loss(output: &[f32], target: &[f32]) -> f32 {
    debug_assert_eq!(output.len(), target.len());
    output
        .iter()
        .zip(target.iter())
        .map(|(&y, &t)| {
            let e = y - t;
            0.5 * e * e
        })
        .sum()
}

/// Gradient of `mse_loss` with respect to the prediction: `y - t`.
pub fn mse_gradient(output: &[f32], target: &[f32]) -> Vec<f32> {
    debug_assert_eq!(output.len(), target.len());
    output
        .iter()
        .zip(target.iter())
        .map(|(&y, &t)| y - t)
        .collect()
}

/// Mean loss of a network over a dataset, without logging.
pub fn mean_loss<N: Network>(network: &N, data: &[DataPoint]) -> Result<f32, EngineError> {
    if data.is_empty() {
        return Err(EngineError::ShapeMismatch(
            "cannot evaluate an empty dataset".to_string(),
        ));
    }
    let mut total = 0.0f64;
    for point in data {
        let output = network.evaluate(&point.input)?;
        if output.len() != point.target.len() {
            return Err(EngineError::ShapeMismatch(format!(
                "network produced {} outputs for a target of {}",
                output.len(),
                point.target.len()
            )));
        }
        total += mse_loss(&output, &point.target) as f64;
    }
    Ok((total / data.len() as f64) as f32)
}

/// Why a training run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainOutcome {
    /// The wall-clock budget ran out (checked between batches).
    TimeExpired,
    /// The cooperative cancel flag was raised.
    Cancelled,
    /// The configured epoch limit was reached.
    EpochLimit,
}

/// Validation loss recorded after a completed epoch.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    pub epoch: usize,
    pub validation_loss: f32,
    pub elapsed_secs: f64,
}

/// Summary of one training run.
#[derive(Debug)]
pub struct TrainingReport {
    pub outcome: TrainOutcome,
    pub epochs_completed: usize,
    pub batches_run: usize,
    pub checkpoints: Vec<Checkpoint>,
    pub final_validation_loss: f32,
}

/// Drives training runs. Owns the optimizer, so adaptive accumulator state
/// persists across `train` calls until the trainer (or its optimizer) is
/// replaced.
pub struct Trainer {
    optimizer: Box<dyn Optimizer>,
    cancel: Arc<AtomicBool>,
    running: bool,
}

impl Trainer {
    pub fn new(optimizer: Box<dyn Optimizer>) -> Self {
        Self {
            optimizer,
            cancel: Arc::new(AtomicBool::new(false)),
            running: false,
        }
    }

    /// Build the trainer with the optimizer the config selects.
    pub fn from_config(config: &TrainingConfig) -> Result<Self, EngineError> {
        Ok(Self::new(crate::config::build_optimizer(config)?))
    }

    /// Flag that requests a clean stop at the next batch boundary. The flag
    /// is caller-owned: clear it before reusing the trainer after a
    /// cancellation.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn optimizer_mut(&mut self) -> &mut dyn Optimizer {
        self.optimizer.as_mut()
    }

    /// Run epochs over shuffled batches until the wall-clock budget, the
    /// epoch limit, or a cancellation stops the loop. After each epoch the
    /// mean validation loss is evaluated, printed, optionally appended to
    /// the configured loss log, and recorded in the report.
    pub fn train<N: Network>(
        &mut self,
        network: &mut N,
        training: &[DataPoint],
        validation: &[DataPoint],
        config: &TrainingConfig,
        budget: Duration,
    ) -> Result<TrainingReport, EngineError> {
        if self.running {
            return Err(EngineError::StateMisuse(
                "train called on a trainer that is already running".to_string(),
            ));
        }
        self.running = true;
        let result = self.run(network, training, validation, config, budget);
        self.running = false;
        result
    }

    fn run<N: Network>(
        &mut self,
        network: &mut N,
        training: &[DataPoint],
        validation: &[DataPoint],
        config: &TrainingConfig,
        budget: Duration,
    ) -> Result<TrainingReport, EngineError> {
        validate_config(config)?;
        check_compatibility(network, training)?;
        check_compatibility(network, validation)?;

        let check_finite = config.check_finite.unwrap_or(false);
        let mut log = match &config.loss_log {
            Some(path) => Some(BufWriter::new(File::create(path)?)),
            None => None,
        };

        // One accumulation buffer per parameter tensor, reused across
        // batches. The enumeration order doubles as the optimizer key.
        let mut batch_grads: Vec<Vec<f32>> = network
            .parameters_mut()
            .iter()
            .map(|tensor| vec![0.0f32; tensor.len()])
            .collect();

        let mut rng = SimpleRng::new(config.shuffle_seed.unwrap_or(0x5eed));
        let mut indices: Vec<usize> = (0..training.len()).collect();

        let start = Instant::now();
        let mut epoch = 0usize;
        let mut batches_run = 0usize;
        let mut checkpoints = Vec::new();

        let outcome = 'training: loop {
            rng.shuffle(&mut indices);

            for batch in indices.chunks(config.batch_size) {
                if start.elapsed() >= budget {
                    break 'training TrainOutcome::TimeExpired;
                }
                if self.cancel.load(Ordering::Relaxed) {
                    break 'training TrainOutcome::Cancelled;
                }

                for buffer in &mut batch_grads {
                    buffer.fill(0.0);
                }

                for sub_batch in batch.chunks(config.sub_batch) {
                    for &index in sub_batch {
                        let point = &training[index];
                        let output = network.forward(&point.input)?;
                        if check_finite {
                            ensure_finite(&output, "activations")?;
                        }
                        let grad = mse_gradient(&output, &point.target);
                        network.backward(&grad)?;
                    }

                    // Fold this sub-batch's gradients into the batch buffers.
                    let sub_grads = network.drain_gradients();
                    for (buffer, grads) in batch_grads.iter_mut().zip(sub_grads.iter()) {
                        matrix::add_assign(buffer, grads);
                    }
                }

                let factor = 1.0 / batch.len() as f32;
                for buffer in &mut batch_grads {
                    matrix::scale(buffer, factor);
                    if check_finite {
                        ensure_finite(buffer, "gradients")?;
                    }
                }

                for (key, (tensor, grads)) in network
                    .parameters_mut()
                    .into_iter()
                    .zip(batch_grads.iter())
                    .enumerate()
                {
                    self.optimizer.update(key, tensor, grads);
                }
                batches_run += 1;
            }

            epoch += 1;
            let validation_loss = mean_loss(network, validation)?;
            let elapsed_secs = start.elapsed().as_secs_f64();
            println!(
                "Epoch {}, validation loss: {:.6}, elapsed: {:.2}s",
                epoch, validation_loss, elapsed_secs
            );
            if let Some(writer) = &mut log {
                writeln!(writer, "{},{},{}", epoch, validation_loss, elapsed_secs)?;
            }
            checkpoints.push(Checkpoint {
                epoch,
                validation_loss,
                elapsed_secs,
            });

            if let Some(max) = config.max_epochs {
                if epoch >= max {
                    break 'training TrainOutcome::EpochLimit;
                }
            }
        };

        if let Some(writer) = &mut log {
            writer.flush()?;
        }

        let final_validation_loss = match checkpoints.last() {
            Some(checkpoint) if outcome == TrainOutcome::EpochLimit => {
                checkpoint.validation_loss
            }
            _ => mean_loss(network, validation)?,
        };

        Ok(TrainingReport {
            outcome,
            epochs_completed: epoch,
            batches_run,
            checkpoints,
            final_validation_loss,
        })
    }
}

fn check_compatibility<N: Network>(
    network: &N,
    data: &[DataPoint],
) -> Result<(), EngineError> {
    let (input_len, target_len) = check_dimensions(data)?;
    network.check_input_len(input_len)?;
    if let Some(output_size) = network.output_size() {
        if target_len != output_size {
            return Err(EngineError::ShapeMismatch(format!(
                "dataset targets have {} values, network produces {}",
                target_len, output_size
            )));
        }
    }
    Ok(())
}

fn ensure_finite(values: &[f32], what: &str) -> Result<(), EngineError> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::NumericInstability(format!(
            "non-finite value detected in {}",
            what
        )));
    }
    Ok(())
}
