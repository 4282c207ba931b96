//! Persistence collaborator.
//!
//! Networks and prepared datasets are snapshotted as JSON under
//! `directory/name.json`: layer types, shapes, and every parameter value go
//! through the serde derives, so opening a saved network reproduces its
//! predictions exactly. Evaluation output is written as plain CSV rows of
//! (reference, predicted) pairs with fixed precision.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::dataset::DataPoint;
use crate::error::EngineError;

fn snapshot_path(directory: &str, name: &str) -> PathBuf {
    Path::new(directory).join(format!("{}.json", name))
}

/// Serialize a network (any topology) to `directory/name.json`, creating
/// the directory if needed.
pub fn save_network<N: Serialize>(
    network: &N,
    directory: &str,
    name: &str,
) -> Result<(), EngineError> {
    fs::create_dir_all(directory)?;
    let file = File::create(snapshot_path(directory, name))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, network)?;
    writer.flush()?;
    Ok(())
}

/// Load a network saved by `save_network`.
pub fn open_network<N: DeserializeOwned>(
    directory: &str,
    name: &str,
) -> Result<N, EngineError> {
    let file = File::open(snapshot_path(directory, name))?;
    let network = serde_json::from_reader(BufReader::new(file))?;
    Ok(network)
}

/// Persist a prepared dataset so training can run as a separate process.
pub fn save_dataset(
    points: &[DataPoint],
    directory: &str,
    name: &str,
) -> Result<(), EngineError> {
    fs::create_dir_all(directory)?;
    let file = File::create(snapshot_path(directory, name))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, points)?;
    writer.flush()?;
    Ok(())
}

/// Load a dataset saved by `save_dataset`.
pub fn open_dataset(directory: &str, name: &str) -> Result<Vec<DataPoint>, EngineError> {
    let file = File::open(snapshot_path(directory, name))?;
    let points = serde_json::from_reader(BufReader::new(file))?;
    Ok(points)
}

/// Write (reference, predicted) rows as `%.6f,%.6f` lines.
pub fn write_predictions_csv(path: &str, rows: &[(f32, f32)]) -> Result<(), EngineError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for (reference, predicted) in rows {
        writeln!(writer, "{:.6},{:.6}", reference, predicted)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path().to_str().unwrap();

        let points = vec![
            DataPoint::new(vec![1.0, 2.0], vec![3.0]),
            DataPoint::new(vec![0.25, -0.5], vec![0.125]),
        ];
        save_dataset(&points, dir, "probe").unwrap();
        let restored = open_dataset(dir, "probe").unwrap();
        assert_eq!(points, restored);
    }

    #[test]
    fn test_open_missing_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let result = open_dataset(dir.path().to_str().unwrap(), "absent");
        assert!(matches!(result, Err(EngineError::Io(_))));
    }

    #[test]
    fn test_predictions_csv_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let path = path.to_str().unwrap();

        write_predictions_csv(path, &[(1.0, 0.5), (-0.25, 2.0)]).unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents, "1.000000,0.500000\n-0.250000,2.000000\n");
    }
}
