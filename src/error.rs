//! Engine error taxonomy
//!
//! Every fallible operation in the crate reports one of these variants.
//! None of them is recovered internally: the engine fails fast and the
//! caller decides whether to abort the run.

use std::error::Error;
use std::fmt;

/// Errors surfaced by the training engine.
#[derive(Debug)]
pub enum EngineError {
    /// A tensor or dataset dimensionality does not match what a layer or
    /// network declared. Raised at construction or training start, never
    /// silently reshaped.
    ShapeMismatch(String),
    /// A forward/backward contract violation: backward without a matching
    /// forward, a recurrent forward while cached activations are still
    /// pending, or a re-entrant trainer call.
    StateMisuse(String),
    /// A non-finite value was detected in activations or gradients while
    /// finite checks were enabled.
    NumericInstability(String),
    /// An invalid configuration value or unknown selector.
    Config(String),
    /// An I/O failure from the storage collaborator.
    Io(std::io::Error),
    /// A serialization or deserialization failure.
    Serialize(serde_json::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::ShapeMismatch(msg) => write!(f, "shape mismatch: {}", msg),
            EngineError::StateMisuse(msg) => write!(f, "state misuse: {}", msg),
            EngineError::NumericInstability(msg) => {
                write!(f, "numeric instability: {}", msg)
            }
            EngineError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            EngineError::Io(err) => write!(f, "i/o failure: {}", err),
            EngineError::Serialize(err) => write!(f, "serialization failure: {}", err),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EngineError::Io(err) => Some(err),
            EngineError::Serialize(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialize(err)
    }
}
