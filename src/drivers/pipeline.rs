use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, TryRecvError};

use crate::drivers::buffer::SampleBuffer;
use crate::drivers::classifier::StateClassifier;
use crate::types::{MentalState, WorkerEvent, WorkerState};

/// Padded, ready-to-plot copy of the buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct LiveView {
    pub values: Vec<f64>,
    pub y_range: (f64, f64),
}

impl LiveView {
    /// Left-pads with the oldest value (zeros when empty) and keeps the newest `display_len`.
    pub fn from_snapshot(snapshot: &[f64], display_len: usize) -> Self {
        let values: Vec<f64> = match snapshot.first() {
            None => vec![0.0; display_len],
            Some(&oldest) if snapshot.len() < display_len => {
                let mut padded = vec![oldest; display_len - snapshot.len()];
                padded.extend_from_slice(snapshot);
                padded
            }
            Some(_) => snapshot[snapshot.len() - display_len..].to_vec(),
        };
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let (lo, hi) = if values.is_empty() || min == max {
            let centre = if values.is_empty() { 0.0 } else { min };
            (centre - 1.0, centre + 1.0)
        } else {
            (min, max)
        };
        let margin = 0.1 * (hi - lo);
        Self {
            values,
            y_range: (lo - margin, hi + margin),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    pub drained: usize,
    pub worker_state: Option<WorkerState>,
    pub state: Option<MentalState>,
    pub changed: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplaySummary {
    pub points: usize,
    pub decisions: BTreeMap<MentalState, usize>,
    pub last: Option<MentalState>,
}

/// Foreground consumer: owns the sample buffer, drains worker events and
/// classifies the newest window on each tick.
pub struct StatePipeline {
    buffer: SampleBuffer,
    classifier: Box<dyn StateClassifier>,
    events: Option<Receiver<WorkerEvent>>,
    worker_state: Option<WorkerState>,
    log_path: Option<PathBuf>,
    current: Option<MentalState>,
}

impl StatePipeline {
    pub fn new(capacity: usize, classifier: Box<dyn StateClassifier>) -> Self {
        if classifier.window_len() > capacity {
            log::warn!(
                "buffer holds {capacity} samples but the classifier needs {}",
                classifier.window_len()
            );
        }
        log::info!("using {} classification", classifier.name());
        Self {
            buffer: SampleBuffer::with_capacity(capacity),
            classifier,
            events: None,
            worker_state: None,
            log_path: None,
            current: None,
        }
    }

    /// Follows a new run. The buffer keeps its contents across runs.
    pub fn attach(&mut self, events: Receiver<WorkerEvent>) {
        self.events = Some(events);
        self.worker_state = None;
        self.log_path = None;
    }

    pub fn worker_state(&self) -> Option<WorkerState> {
        self.worker_state
    }

    pub fn log_path(&self) -> Option<&std::path::Path> {
        self.log_path.as_deref()
    }

    pub fn current_state(&self) -> Option<MentalState> {
        self.current
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    pub fn push_value(&mut self, voltage: f64) {
        self.buffer.append(voltage);
    }

    pub fn snapshot(&self) -> Vec<f64> {
        self.buffer.snapshot()
    }

    pub fn live_view(&self, display_len: usize) -> LiveView {
        LiveView::from_snapshot(&self.buffer.snapshot(), display_len)
    }

    /// Drains every pending worker event without blocking.
    pub fn pump(&mut self) -> usize {
        let Some(events) = self.events.as_ref() else {
            return 0;
        };
        let mut drained = 0;
        let mut disconnected = false;
        loop {
            match events.try_recv() {
                Ok(WorkerEvent::Sample(sample)) => {
                    self.buffer.append(sample.voltage);
                    drained += 1;
                }
                Ok(WorkerEvent::State(state)) => {
                    log::info!("reader is {state:?}");
                    self.worker_state = Some(state);
                }
                Ok(WorkerEvent::LogOpened(path)) => self.log_path = Some(path),
                Ok(WorkerEvent::Finished { state, rows_logged }) => {
                    self.worker_state = Some(state);
                    log::info!("run finished ({state:?}) with {rows_logged} rows logged");
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        if disconnected {
            self.events = None;
        }
        drained
    }

    /// Classifies the newest full window, or `None` while it is still filling.
    pub fn classify_latest(&mut self) -> (Option<MentalState>, bool) {
        let window_len = self.classifier.window_len();
        let Some(window) = self.buffer.latest_window(window_len) else {
            return (None, false);
        };
        let state = self.classifier.classify(&window);
        let changed = state.is_some() && state != self.current;
        if changed {
            if let Some(s) = state {
                log::debug!("state -> {s} ({})", s.color());
            }
        }
        if state.is_some() {
            self.current = state;
        }
        (state, changed)
    }

    pub fn tick(&mut self) -> TickReport {
        let drained = self.pump();
        let (state, changed) = self.classify_latest();
        TickReport {
            drained,
            worker_state: self.worker_state,
            state,
            changed,
        }
    }

    /// Feeds a recorded series through the buffer, classifying every `stride` points.
    pub fn replay(&mut self, values: &[f64], stride: usize) -> ReplaySummary {
        let stride = stride.max(1);
        let mut summary = ReplaySummary {
            points: values.len(),
            ..ReplaySummary::default()
        };
        for (i, v) in values.iter().enumerate() {
            self.push_value(*v);
            if (i + 1) % stride != 0 {
                continue;
            }
            if let (Some(state), _) = self.classify_latest() {
                *summary.decisions.entry(state).or_insert(0) += 1;
                summary.last = Some(state);
            }
        }
        summary
    }
}
