//! Training data as the engine consumes it.
//!
//! The dataset collaborator hands the core a flat, already windowed and
//! normalized collection of (input, target) pairs. The core only reads them;
//! the single requirement is dimensional consistency across the set.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// One supervised example: an input vector (or flattened sequence) and the
/// target vector it should map to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub input: Vec<f32>,
    pub target: Vec<f32>,
}

impl DataPoint {
    pub fn new(input: Vec<f32>, target: Vec<f32>) -> Self {
        Self { input, target }
    }
}

/// Verify that every point in the set shares the dimensions of the first and
/// return those dimensions as (input_len, target_len).
///
/// An empty set, an empty vector, or a ragged point is a `ShapeMismatch`.
pub fn check_dimensions(points: &[DataPoint]) -> Result<(usize, usize), EngineError> {
    let first = points.first().ok_or_else(|| {
        EngineError::ShapeMismatch("dataset is empty".to_string())
    })?;

    let (input_len, target_len) = (first.input.len(), first.target.len());
    if input_len == 0 || target_len == 0 {
        return Err(EngineError::ShapeMismatch(
            "dataset contains an empty input or target vector".to_string(),
        ));
    }

    for (i, point) in points.iter().enumerate() {
        if point.input.len() != input_len || point.target.len() != target_len {
            return Err(EngineError::ShapeMismatch(format!(
                "datapoint {} has dimensions ({}, {}), expected ({}, {})",
                i,
                point.input.len(),
                point.target.len(),
                input_len,
                target_len
            )));
        }
    }

    Ok((input_len, target_len))
}

/// Split a dataset into a leading training slice and a trailing validation
/// slice of `validation_len` points.
pub fn split_validation(
    points: &[DataPoint],
    validation_len: usize,
) -> Result<(&[DataPoint], &[DataPoint]), EngineError> {
    if validation_len == 0 || validation_len >= points.len() {
        return Err(EngineError::Config(format!(
            "validation split of {} points does not fit a dataset of {}",
            validation_len,
            points.len()
        )));
    }
    Ok(points.split_at(points.len() - validation_len))
}
