// src/bin/train.rs
//! Trains the learned classifier from a labelled segment CSV and saves the artifact.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;

use neurostate::config::AppConfig;
use neurostate::drivers::ForestParams;
use neurostate::trainer::{load_dataset, train, TrainOptions};

#[derive(Debug, Parser)]
#[command(name = "neurostate-train", version, about = "Train the mental-state model")]
struct Args {
    /// CSV with voltage_0..voltage_N columns and a label column
    #[arg(long)]
    data: PathBuf,
    #[arg(long, default_value = "models/eeg_state_model.json")]
    output: PathBuf,
    /// JSON config, read for the sampling rate
    #[arg(long, default_value = "neurostate.json")]
    config: PathBuf,
    #[arg(long, default_value_t = 200)]
    trees: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 0.2)]
    test_fraction: f64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    anyhow::ensure!(
        args.test_fraction > 0.0 && args.test_fraction < 1.0,
        "--test-fraction must be between 0 and 1"
    );
    anyhow::ensure!(args.trees > 0, "--trees must be at least 1");

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let dataset = load_dataset(&args.data)?;
    let options = TrainOptions {
        sample_rate_hz: config.sampling_rate_hz,
        test_fraction: args.test_fraction,
        forest: ForestParams {
            n_trees: args.trees,
            seed: args.seed,
            ..ForestParams::default()
        },
    };
    let outcome = train(&dataset, &options).context("training failed")?;

    println!("Classification report:");
    println!("{}", outcome.report);
    outcome
        .artifact
        .save(&args.output)
        .with_context(|| format!("saving model to {}", args.output.display()))?;
    println!("Saved model to {}", args.output.display());
    Ok(())
}
