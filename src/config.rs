//! Training configuration.
//!
//! Hyperparameters travel in an explicit, immutable `TrainingConfig` that is
//! handed to the trainer at call time; nothing is mutated mid-run. Configs
//! can be parsed from JSON files; different optimizers read different
//! optional fields:
//!
//! - **sgd**: no extra fields
//! - **adagrad**: optional `epsilon` (default 1e-8)
//! - **adam**: optional `beta1` (default 0.9), `beta2` (default 0.999),
//!   `epsilon` (default 1e-8)
//!
//! # Example
//!
//! ```json
//! {
//!   "batch_size": 128,
//!   "sub_batch": 16,
//!   "learning_rate": 1.0,
//!   "optimizer": "adagrad",
//!   "epsilon": 0.1
//! }
//! ```

use serde::Deserialize;
use std::fs;

use crate::error::EngineError;
use crate::optimizers::{AdaGrad, Adam, Optimizer, SGD};

/// Hyperparameters for one training run.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    /// Examples per optimizer step.
    pub batch_size: usize,

    /// Examples per forward/backward accumulation chunk; bounds peak memory
    /// without changing the effective batch size.
    pub sub_batch: usize,

    /// Base learning rate handed to the optimizer.
    pub learning_rate: f32,

    /// Optimizer selector: "sgd", "adagrad", or "adam".
    pub optimizer: String,

    /// Stabilizing epsilon for adagrad/adam.
    pub epsilon: Option<f32>,

    /// First-moment decay for adam.
    pub beta1: Option<f32>,

    /// Second-moment decay for adam.
    pub beta2: Option<f32>,

    /// Stop after this many epochs even if time remains.
    pub max_epochs: Option<usize>,

    /// Abort with an error when activations or gradients go non-finite.
    pub check_finite: Option<bool>,

    /// Seed for the shuffling RNG; a fixed default keeps runs reproducible.
    pub shuffle_seed: Option<u64>,

    /// Path of a CSV loss log (`epoch,loss,elapsed`), written per epoch.
    pub loss_log: Option<String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            sub_batch: 8,
            learning_rate: 0.01,
            optimizer: "adagrad".to_string(),
            epsilon: None,
            beta1: None,
            beta2: None,
            max_epochs: None,
            check_finite: None,
            shuffle_seed: None,
            loss_log: None,
        }
    }
}

/// Load a training configuration from a JSON file and validate it.
pub fn load_config(path: &str) -> Result<TrainingConfig, EngineError> {
    let contents = fs::read_to_string(path)?;
    let config: TrainingConfig = serde_json::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Reject configurations the trainer cannot honor.
pub fn validate_config(config: &TrainingConfig) -> Result<(), EngineError> {
    if config.batch_size == 0 {
        return Err(EngineError::Config(
            "batch_size must be greater than 0".to_string(),
        ));
    }
    if config.sub_batch == 0 {
        return Err(EngineError::Config(
            "sub_batch must be greater than 0".to_string(),
        ));
    }
    if config.sub_batch > config.batch_size {
        return Err(EngineError::Config(format!(
            "sub_batch ({}) must not exceed batch_size ({})",
            config.sub_batch, config.batch_size
        )));
    }
    if !(config.learning_rate > 0.0 && config.learning_rate.is_finite()) {
        return Err(EngineError::Config(
            "learning_rate must be positive and finite".to_string(),
        ));
    }

    let valid_optimizers = ["sgd", "adagrad", "adam"];
    if !valid_optimizers.contains(&config.optimizer.to_lowercase().as_str()) {
        return Err(EngineError::Config(format!(
            "invalid optimizer '{}', must be one of: {}",
            config.optimizer,
            valid_optimizers.join(", ")
        )));
    }

    if let Some(epsilon) = config.epsilon {
        if epsilon <= 0.0 {
            return Err(EngineError::Config("epsilon must be positive".to_string()));
        }
    }
    for (name, value) in [("beta1", config.beta1), ("beta2", config.beta2)] {
        if let Some(beta) = value {
            if !(0.0..1.0).contains(&beta) {
                return Err(EngineError::Config(format!(
                    "{} must be in [0, 1), got {}",
                    name, beta
                )));
            }
        }
    }
    if let Some(max_epochs) = config.max_epochs {
        if max_epochs == 0 {
            return Err(EngineError::Config(
                "max_epochs must be greater than 0".to_string(),
            ));
        }
    }

    Ok(())
}

/// Construct the optimizer a configuration selects.
pub fn build_optimizer(config: &TrainingConfig) -> Result<Box<dyn Optimizer>, EngineError> {
    validate_config(config)?;
    let optimizer: Box<dyn Optimizer> = match config.optimizer.to_lowercase().as_str() {
        "sgd" => Box::new(SGD::new(config.learning_rate)),
        "adagrad" => Box::new(AdaGrad::new(
            config.learning_rate,
            config.epsilon.unwrap_or(1e-8),
        )),
        "adam" => Box::new(Adam::new(
            config.learning_rate,
            config.beta1.unwrap_or(0.9),
            config.beta2.unwrap_or(0.999),
            config.epsilon.unwrap_or(1e-8),
        )),
        other => {
            return Err(EngineError::Config(format!(
                "invalid optimizer '{}'",
                other
            )))
        }
    };
    Ok(optimizer)
}
