// src/main.rs
//! Headless acquisition runner: streams from the serial device (or replays a
//! recorded run log) and reports mental-state changes as they happen.
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;

use neurostate::config::AppConfig;
use neurostate::drivers::{select_classifier, SerialOpener, StatePipeline};
use neurostate::engine::{AcquisitionController, WorkerSettings};
use neurostate::recorder::read_history;

#[derive(Debug, Parser)]
#[command(name = "neurostate", version, about = "EEG serial acquisition and mental-state readout")]
struct Args {
    /// JSON config file (defaults are used when it does not exist)
    #[arg(long, default_value = "neurostate.json")]
    config: PathBuf,
    /// Serial device, overrides the config
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    /// Stop after this many seconds; runs until the reader ends otherwise
    #[arg(long)]
    duration_secs: Option<u64>,
    /// Classify a recorded run log instead of opening the device
    #[arg(long)]
    replay: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(port) = args.port {
        config.serial_port = port;
    }
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }

    let classifier = select_classifier(
        &config.model_path,
        config.rule_thresholds,
        config.sampling_rate_hz,
        config.window_samples(),
    );
    let mut pipeline = StatePipeline::new(config.buffer_capacity, classifier);

    match args.replay {
        Some(path) => replay(&config, &mut pipeline, &path),
        None => stream(&config, &mut pipeline, args.duration_secs.map(Duration::from_secs)),
    }
}

/// Samples that arrive between two ticks at the configured rate.
fn samples_per_tick(config: &AppConfig) -> usize {
    let per_tick = config.sampling_rate_hz * config.tick_interval().as_secs_f64();
    (per_tick.round() as usize).max(1)
}

fn replay(config: &AppConfig, pipeline: &mut StatePipeline, path: &Path) -> Result<()> {
    let values = read_history(path).with_context(|| format!("reading {}", path.display()))?;
    log::info!("replaying {} samples from {}", values.len(), path.display());
    let summary = pipeline.replay(&values, samples_per_tick(config));
    println!("replayed {} samples with {} classification", summary.points, pipeline.classifier_name());
    if summary.decisions.is_empty() {
        println!("not enough samples for a full {}-sample window", config.window_samples());
    }
    for (state, count) in &summary.decisions {
        println!("  {state:<8} {count}");
    }
    if let Some(last) = summary.last {
        println!("final state: {last} ({})", last.color());
    }
    Ok(())
}

fn stream(config: &AppConfig, pipeline: &mut StatePipeline, limit: Option<Duration>) -> Result<()> {
    let mut controller = AcquisitionController::new(WorkerSettings::from_config(config));
    let opener = SerialOpener {
        port: config.serial_port.clone(),
        baud_rate: config.baud_rate,
        read_timeout: config.read_timeout(),
    };
    let events = controller
        .start(Box::new(opener))
        .context("starting the serial reader")?;
    pipeline.attach(events);

    let started = Instant::now();
    loop {
        let report = pipeline.tick();
        if report.changed {
            if let Some(state) = report.state {
                println!("{:>8.1}s  {state} ({})", started.elapsed().as_secs_f64(), state.color());
            }
        }
        if report.worker_state.map_or(false, |s| s.is_terminal()) || !controller.is_running() {
            break;
        }
        if limit.map_or(false, |limit| started.elapsed() >= limit) {
            log::info!("duration reached, stopping");
            break;
        }
        thread::sleep(config.tick_interval());
    }

    let final_state = controller.stop();
    pipeline.pump();
    if let Some(path) = pipeline.log_path() {
        println!("run log: {}", path.display());
    }
    log::info!("reader ended as {final_state:?}");
    Ok(())
}
