use seqnet::config::TrainingConfig;
use seqnet::dataset::DataPoint;
use seqnet::layers::{Layer, LstmLayer};
use seqnet::network::{Network, Sequential};
use seqnet::storage;
use seqnet::training::Trainer;
use seqnet::utils::SimpleRng;
use std::process;
use std::time::{Duration, Instant};

// Sequence forecasting demo: train a recurrent network to predict future
// values of a synthetic multi-feature series.
const FEATURES: usize = 3;
const WINDOW_STEPS: usize = 40;
const HORIZON: usize = 5; // future values to predict
const HORIZON_STRIDE: usize = 5; // distance between predicted values
const SERIES_LEN: usize = 3200;
const TRAIN_SPLIT: usize = 2600;

const DATA_DIR: &str = "data";
const DATASET_NAME: &str = "sequence_windows";
const NETWORK_DIR: &str = "savednetworks";
const NETWORK_NAME: &str = "lstm_forecast";
const RETRAINED_NAME: &str = "lstm_forecast_retrained";
const ANALYSIS_CSV: &str = "analysis/output.csv";

const TRAIN_SECONDS: u64 = 60;

fn fatal(message: &str) -> ! {
    eprintln!("{}", message);
    process::exit(1);
}

// Bounded synthetic series: three slow oscillations plus a little
// deterministic noise, all kept inside [0, 1].
fn generate_series(len: usize) -> Vec<[f32; FEATURES]> {
    let mut rng = SimpleRng::new(2024);
    let mut series = Vec::with_capacity(len);
    for t in 0..len {
        let t = t as f32;
        let base = 0.5 + 0.35 * (t / 53.0).sin();
        let fast = 0.5 + 0.25 * (t / 11.0 + 1.3).sin();
        let noise = rng.uniform(-0.02, 0.02);
        let mixed = (0.6 * base + 0.4 * fast + noise).clamp(0.0, 1.0);
        series.push([base, fast, mixed]);
    }
    series
}

/// Window the series into supervised examples: each input is WINDOW_STEPS
/// consecutive feature rows flattened, each target is the mixed feature at
/// HORIZON future offsets.
fn window_series(series: &[[f32; FEATURES]]) -> Vec<DataPoint> {
    let reach = HORIZON * HORIZON_STRIDE;
    let mut points = Vec::new();
    for start in 0..series.len().saturating_sub(WINDOW_STEPS + reach) {
        let mut input = Vec::with_capacity(WINDOW_STEPS * FEATURES);
        for row in &series[start..start + WINDOW_STEPS] {
            input.extend_from_slice(row);
        }
        let last = start + WINDOW_STEPS - 1;
        let target: Vec<f32> = (1..=HORIZON)
            .map(|k| series[last + k * HORIZON_STRIDE][FEATURES - 1])
            .collect();
        points.push(DataPoint::new(input, target));
    }
    points
}

fn prepare_data() {
    let series = generate_series(SERIES_LEN);
    let dataset = window_series(&series);
    println!(
        "Prepared {} windows of {} inputs -> {} targets",
        dataset.len(),
        WINDOW_STEPS * FEATURES,
        HORIZON
    );

    storage::save_dataset(&dataset, DATA_DIR, DATASET_NAME)
        .unwrap_or_else(|err| fatal(&format!("could not save dataset: {}", err)));

    let first = &dataset[0];
    println!("Input[..6]: {:?}", &first.input[..6]);
    println!("Output: {:?}", first.target);
}

fn open_prepared_dataset() -> Vec<DataPoint> {
    storage::open_dataset(DATA_DIR, DATASET_NAME).unwrap_or_else(|err| {
        fatal(&format!(
            "could not open prepared dataset (run with -prep first?): {}",
            err
        ))
    })
}

// Two stacked LSTMs over the window, then a dense head down to the horizon.
fn build_network() -> Sequential {
    let mut rng = SimpleRng::from_time();
    Sequential::initialize(
        WINDOW_STEPS * FEATURES,
        vec![
            Layer::from(LstmLayer::new(FEATURES, 10, &mut rng).output_sequence(true)),
            Layer::from(LstmLayer::new(20, 10, &mut rng).output_sequence(true)),
            Layer::linear(200, 50, &mut rng),
            Layer::lanh(),
            Layer::linear(50, HORIZON, &mut rng),
            Layer::relu(),
        ],
    )
    .unwrap_or_else(|err| fatal(&format!("could not build network: {}", err)))
}

fn training_config(learning_rate: f32) -> TrainingConfig {
    TrainingConfig {
        batch_size: 128,
        sub_batch: 16,
        learning_rate,
        optimizer: "adagrad".to_string(),
        epsilon: Some(0.1),
        ..TrainingConfig::default()
    }
}

fn run_training(network: &mut Sequential, config: &TrainingConfig) {
    let dataset = open_prepared_dataset();
    if dataset.len() <= TRAIN_SPLIT {
        fatal("prepared dataset is smaller than the train split");
    }
    let (training, testing) = dataset.split_at(TRAIN_SPLIT);

    let mut trainer = Trainer::from_config(config)
        .unwrap_or_else(|err| fatal(&format!("invalid training config: {}", err)));

    let start = Instant::now();
    let report = trainer
        .train(
            network,
            training,
            testing,
            config,
            Duration::from_secs(TRAIN_SECONDS),
        )
        .unwrap_or_else(|err| fatal(&format!("training failed: {}", err)));
    println!(
        "Finished after {} epochs / {} batches in {:.2}s ({:?})",
        report.epochs_completed,
        report.batches_run,
        start.elapsed().as_secs_f64(),
        report.outcome
    );

    network
        .test_on_and_log(training)
        .unwrap_or_else(|err| fatal(&format!("evaluation failed: {}", err)));
}

fn train() {
    let mut network = build_network();
    run_training(&mut network, &training_config(1.0));

    storage::save_network(&network, NETWORK_DIR, NETWORK_NAME)
        .unwrap_or_else(|err| fatal(&format!("could not save network: {}", err)));
    println!("Network saved to {}/{}.json", NETWORK_DIR, NETWORK_NAME);
}

fn retrain() {
    let mut network: Sequential = storage::open_network(NETWORK_DIR, NETWORK_NAME)
        .unwrap_or_else(|err| fatal(&format!("could not open saved network: {}", err)));
    run_training(&mut network, &training_config(0.01));

    storage::save_network(&network, NETWORK_DIR, RETRAINED_NAME)
        .unwrap_or_else(|err| fatal(&format!("could not save network: {}", err)));
    println!("Network saved to {}/{}.json", NETWORK_DIR, RETRAINED_NAME);
}

fn test() {
    let dataset = open_prepared_dataset();
    let network: Sequential = storage::open_network(NETWORK_DIR, NETWORK_NAME)
        .unwrap_or_else(|err| fatal(&format!("could not open saved network: {}", err)));

    network
        .test_on_and_log(&dataset)
        .unwrap_or_else(|err| fatal(&format!("evaluation failed: {}", err)));

    let mut rows = Vec::with_capacity(dataset.len());
    for point in &dataset {
        let output = network
            .evaluate(&point.input)
            .unwrap_or_else(|err| fatal(&format!("evaluation failed: {}", err)));
        let reference = *point.input.last().unwrap_or(&0.0);
        let predicted = *output.last().unwrap_or(&0.0);
        rows.push((reference, predicted));
    }
    storage::write_predictions_csv(ANALYSIS_CSV, &rows)
        .unwrap_or_else(|err| fatal(&format!("could not write {}: {}", ANALYSIS_CSV, err)));
    println!("Wrote {} prediction rows to {}", rows.len(), ANALYSIS_CSV);
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    match args.len() {
        1 => train(),
        2 => match args[1].as_str() {
            "-prep" | "-p" => prepare_data(),
            "-test" | "-t" => test(),
            "-retrain" | "-r" => retrain(),
            flag => fatal(&format!(
                "{} is not a valid flag (only -prep, -retrain, or -test works)",
                flag
            )),
        },
        _ => fatal("this program only takes 0 or 1 arguments!"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_stays_bounded() {
        for row in generate_series(500) {
            for value in row {
                assert!((0.0..=1.0).contains(&value));
            }
        }
    }

    #[test]
    fn test_window_shapes() {
        let series = generate_series(200);
        let points = window_series(&series);
        assert!(!points.is_empty());
        for point in &points {
            assert_eq!(point.input.len(), WINDOW_STEPS * FEATURES);
            assert_eq!(point.target.len(), HORIZON);
        }
    }

    #[test]
    fn test_network_shapes_chain() {
        let network = build_network();
        assert_eq!(network.input_size(), WINDOW_STEPS * FEATURES);
        assert_eq!(network.output_size(), Some(HORIZON));
    }
}
