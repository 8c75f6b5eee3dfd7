// src/engine.rs
//! Serial ingestion worker and the controller that starts and stops it.
//!
//! The worker owns the device handle and the run log. Accepted samples are
//! written to the log first and then forwarded over a bounded channel to the
//! consumer that owns the sample buffer.
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{Local, Utc};

use crate::config::AppConfig;
use crate::drivers::parser::parse_bytes;
use crate::drivers::{AcquisitionError, LineSource, SourceOpener};
use crate::recorder::RunLog;
use crate::types::{Sample, WorkerEvent, WorkerState};

const SETTLE_POLL: Duration = Duration::from_millis(20);
const FINAL_RETRY: Duration = Duration::from_millis(5);

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub settle_delay: Duration,
    pub data_dir: PathBuf,
    pub event_capacity: usize,
    pub join_timeout: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            settle_delay: config.settle_delay(),
            data_dir: config.data_dir.clone(),
            event_capacity: config.event_channel_capacity.max(1),
            join_timeout: config.stop_join_timeout(),
        }
    }
}

struct Worker {
    opener: Box<dyn SourceOpener>,
    log_path: PathBuf,
    settle_delay: Duration,
    events: SyncSender<WorkerEvent>,
    stop: Arc<AtomicBool>,
    dropped: u64,
}

impl Worker {
    fn run(mut self) -> (WorkerState, u64) {
        self.emit(WorkerEvent::State(WorkerState::Connecting));
        let target = self.opener.describe();
        let mut source = match self.opener.open() {
            Ok(source) => source,
            Err(err) => {
                log::error!("{err}");
                return (WorkerState::Failed, 0);
            }
        };
        // 等待设备复位完成
        if !self.settle() {
            log::info!("stop requested while {target} was settling");
            return (WorkerState::Stopped, 0);
        }
        let mut run_log = match RunLog::create(&self.log_path) {
            Ok(log) => log,
            Err(err) => {
                log::error!("{err}");
                return (WorkerState::Failed, 0);
            }
        };
        self.emit(WorkerEvent::LogOpened(self.log_path.clone()));
        log::info!("reading from {target}, logging to {}", self.log_path.display());
        self.emit(WorkerEvent::State(WorkerState::Streaming));

        let state = self.stream(source.as_mut(), &mut run_log);
        drop(source);
        let rows = match run_log.close() {
            Ok(rows) => rows,
            Err(err) => {
                log::error!("{err}");
                return (WorkerState::Failed, 0);
            }
        };
        if self.dropped > 0 {
            log::warn!("{} events were not delivered to the consumer; the run log is complete", self.dropped);
        }
        log::info!("reader stopped ({state:?}); {rows} rows saved to {}", self.log_path.display());
        (state, rows)
    }

    fn settle(&self) -> bool {
        let started = Instant::now();
        while started.elapsed() < self.settle_delay {
            if self.stop.load(Ordering::Acquire) {
                return false;
            }
            let remaining = self.settle_delay.saturating_sub(started.elapsed());
            thread::sleep(SETTLE_POLL.min(remaining));
        }
        !self.stop.load(Ordering::Acquire)
    }

    fn stream(&mut self, source: &mut dyn LineSource, run_log: &mut RunLog) -> WorkerState {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return WorkerState::Stopped;
            }
            let bytes = match source.read_line() {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(err) => {
                    log::error!("{}", AcquisitionError::Read(err));
                    return WorkerState::Failed;
                }
            };
            let Some(parsed) = parse_bytes(&bytes) else {
                log::trace!("skipping line {:?}", String::from_utf8_lossy(&bytes));
                continue;
            };
            let sample = Sample {
                captured_at: Utc::now(),
                raw: parsed.raw,
                voltage: parsed.voltage,
            };
            if let Err(err) = run_log.append(&sample) {
                log::error!("{err}");
                return WorkerState::Failed;
            }
            self.emit(WorkerEvent::Sample(sample));
        }
    }

    fn emit(&mut self, event: WorkerEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped == 1 || self.dropped % 1000 == 0 {
                    log::warn!("event channel full; {} events dropped so far", self.dropped);
                }
            }
        }
    }
}

/// Final lifecycle events must not be dropped like samples: retry while the
/// consumer catches up, until `deadline` or until it disconnects.
fn deliver_final(events: &SyncSender<WorkerEvent>, event: WorkerEvent, deadline: Instant) {
    let mut event = event;
    loop {
        match events.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => return,
            Err(TrySendError::Full(back)) => {
                if Instant::now() >= deadline {
                    log::warn!("event channel still full; final {back:?} not delivered");
                    return;
                }
                event = back;
                thread::sleep(FINAL_RETRY);
            }
        }
    }
}

struct ActiveRun {
    stop: Arc<AtomicBool>,
    done: Receiver<(WorkerState, u64)>,
    handle: JoinHandle<()>,
    log_path: PathBuf,
}

/// Starts at most one ingestion worker at a time and stops it with a bounded wait.
pub struct AcquisitionController {
    settings: WorkerSettings,
    active: Option<ActiveRun>,
}

impl AcquisitionController {
    pub fn new(settings: WorkerSettings) -> Self {
        Self {
            settings,
            active: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map_or(false, |run| !run.handle.is_finished())
    }

    pub fn log_path(&self) -> Option<&std::path::Path> {
        self.active.as_ref().map(|run| run.log_path.as_path())
    }

    /// Spawns a fresh worker with a fresh run log and returns its event stream.
    pub fn start(
        &mut self,
        opener: Box<dyn SourceOpener>,
    ) -> Result<Receiver<WorkerEvent>, AcquisitionError> {
        if self.is_running() {
            return Err(AcquisitionError::AlreadyRunning);
        }
        // reap a worker that already ended on its own
        if let Some(previous) = self.active.take() {
            let _ = previous.handle.join();
        }

        let log_path = RunLog::path_for(&self.settings.data_dir, Local::now());
        let (events_tx, events_rx) = mpsc::sync_channel(self.settings.event_capacity);
        let (done_tx, done_rx): (Sender<(WorkerState, u64)>, _) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            opener,
            log_path: log_path.clone(),
            settle_delay: self.settings.settle_delay,
            events: events_tx,
            stop: Arc::clone(&stop),
            dropped: 0,
        };
        // leave stop() time to receive `done` after the final events go out
        let final_budget = self.settings.join_timeout / 2;
        let handle = thread::Builder::new()
            .name("serial-reader".into())
            .spawn(move || {
                let events = worker.events.clone();
                let (state, rows_logged) = worker.run();
                let deadline = Instant::now() + final_budget;
                deliver_final(&events, WorkerEvent::State(state), deadline);
                deliver_final(&events, WorkerEvent::Finished { state, rows_logged }, deadline);
                let _ = done_tx.send((state, rows_logged));
            })
            .map_err(AcquisitionError::Spawn)?;

        self.active = Some(ActiveRun {
            stop,
            done: done_rx,
            handle,
            log_path,
        });
        Ok(events_rx)
    }

    /// Requests a stop and waits up to the join timeout.
    ///
    /// Returns the worker's final state, or `None` when nothing was running or
    /// the worker did not finish in time (it is then left to exit on its own).
    pub fn stop(&mut self) -> Option<WorkerState> {
        let run = self.active.take()?;
        run.stop.store(true, Ordering::Release);
        match run.done.recv_timeout(self.settings.join_timeout) {
            Ok((state, _)) => {
                let _ = run.handle.join();
                Some(state)
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "reader did not stop within {:?}; detaching",
                    self.settings.join_timeout
                );
                None
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::error!("reader thread exited without reporting a final state");
                let _ = run.handle.join();
                None
            }
        }
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ScriptedSource;
    use crate::recorder::read_history;
    use std::io;
    use std::sync::Mutex;

    struct ScriptedOpener {
        script: Mutex<Option<ScriptedSource>>,
    }

    impl ScriptedOpener {
        fn boxed(source: ScriptedSource) -> Box<dyn SourceOpener> {
            Box::new(Self {
                script: Mutex::new(Some(source)),
            })
        }
    }

    impl SourceOpener for ScriptedOpener {
        fn describe(&self) -> String {
            "scripted".into()
        }

        fn open(&self) -> Result<Box<dyn LineSource>, AcquisitionError> {
            match self.script.lock().unwrap().take() {
                Some(source) => Ok(Box::new(source)),
                None => Err(AcquisitionError::Open {
                    port: "scripted".into(),
                    source: serialport::Error::new(serialport::ErrorKind::NoDevice, "used up"),
                }),
            }
        }
    }

    struct FailingOpener;

    impl SourceOpener for FailingOpener {
        fn describe(&self) -> String {
            "nowhere".into()
        }

        fn open(&self) -> Result<Box<dyn LineSource>, AcquisitionError> {
            Err(AcquisitionError::Open {
                port: "nowhere".into(),
                source: serialport::Error::new(serialport::ErrorKind::NoDevice, "no such port"),
            })
        }
    }

    fn settings(dir: &std::path::Path) -> WorkerSettings {
        WorkerSettings {
            settle_delay: Duration::ZERO,
            data_dir: dir.to_path_buf(),
            event_capacity: 64,
            join_timeout: Duration::from_secs(2),
        }
    }

    fn wait_for_finish(rx: &Receiver<WorkerEvent>) -> (Vec<Sample>, WorkerState, u64) {
        let mut samples = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                WorkerEvent::Sample(s) => samples.push(s),
                WorkerEvent::Finished { state, rows_logged } => return (samples, state, rows_logged),
                _ => {}
            }
        }
    }

    fn wait_for_samples(rx: &Receiver<WorkerEvent>, n: usize) -> Vec<Sample> {
        let mut samples = Vec::new();
        while samples.len() < n {
            if let WorkerEvent::Sample(s) = rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                samples.push(s);
            }
        }
        samples
    }

    #[test]
    fn streams_parsed_samples_and_logs_them() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = AcquisitionController::new(settings(dir.path()));
        let source = ScriptedSource::from_lines([
            "Raw: 1425\tVoltage: 1.87\n",
            "garbage text\n",
            "0.42\n",
            "\n",
            "Voltage: -0.5\n",
        ]);
        let rx = controller.start(ScriptedOpener::boxed(source)).unwrap();
        let samples = wait_for_samples(&rx, 3);
        let voltages: Vec<f64> = samples.iter().map(|s| s.voltage).collect();
        assert_eq!(voltages, vec![1.87, 0.42, -0.5]);
        assert_eq!(samples[0].raw, Some(1425));

        let log_path = controller.log_path().unwrap().to_path_buf();
        assert_eq!(controller.stop(), Some(WorkerState::Stopped));
        assert_eq!(read_history(&log_path).unwrap(), voltages);
        let (_, state, rows) = wait_for_finish(&rx);
        assert_eq!(state, WorkerState::Stopped);
        assert_eq!(rows, 3);
    }

    #[test]
    fn open_failure_ends_in_failed_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = AcquisitionController::new(settings(dir.path()));
        let rx = controller.start(Box::new(FailingOpener)).unwrap();
        let (samples, state, rows) = wait_for_finish(&rx);
        assert!(samples.is_empty());
        assert_eq!(state, WorkerState::Failed);
        assert_eq!(rows, 0);
        assert!(!controller.is_running() || controller.stop() == Some(WorkerState::Failed));
    }

    #[test]
    fn read_error_fails_but_keeps_logged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = AcquisitionController::new(settings(dir.path()));
        let source = ScriptedSource::new(vec![
            Ok(Some(b"1.0\n".to_vec())),
            Ok(None),
            Ok(Some(b"2.0\n".to_vec())),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
            Ok(Some(b"3.0\n".to_vec())),
        ]);
        let rx = controller.start(ScriptedOpener::boxed(source)).unwrap();
        let (samples, state, rows) = wait_for_finish(&rx);
        assert_eq!(state, WorkerState::Failed);
        assert_eq!(samples.len(), 2);
        assert_eq!(rows, 2);
        let log_path = controller.log_path().unwrap().to_path_buf();
        assert_eq!(read_history(&log_path).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn second_start_while_running_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = AcquisitionController::new(settings(dir.path()));
        let _rx = controller
            .start(ScriptedOpener::boxed(ScriptedSource::from_lines(["1.0\n"])))
            .unwrap();
        assert!(controller.is_running());
        assert!(matches!(
            controller.start(ScriptedOpener::boxed(ScriptedSource::from_lines(["2.0\n"]))),
            Err(AcquisitionError::AlreadyRunning)
        ));
        assert_eq!(controller.stop(), Some(WorkerState::Stopped));
        assert_eq!(controller.stop(), None);
    }

    #[test]
    fn restart_after_stop_uses_a_fresh_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = AcquisitionController::new(settings(dir.path()));

        let rx = controller
            .start(ScriptedOpener::boxed(ScriptedSource::from_lines(["1.0\n"])))
            .unwrap();
        wait_for_samples(&rx, 1);
        let first = controller.log_path().unwrap().to_path_buf();
        controller.stop();

        let rx = controller
            .start(ScriptedOpener::boxed(ScriptedSource::from_lines(["2.0\n", "3.0\n"])))
            .unwrap();
        wait_for_samples(&rx, 2);
        let second = controller.log_path().unwrap().to_path_buf();
        controller.stop();

        assert_ne!(first, second);
        assert_eq!(read_history(&first).unwrap(), vec![1.0]);
        assert_eq!(read_history(&second).unwrap(), vec![2.0, 3.0]);
    }

    #[test]
    fn final_state_survives_a_full_channel() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.event_capacity = 2;
        let mut controller = AcquisitionController::new(s);
        let mut script: Vec<io::Result<Option<Vec<u8>>>> =
            (0..20).map(|i| Ok(Some(format!("{i}.0\n").into_bytes()))).collect();
        script.push(Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
        let rx = controller.start(ScriptedOpener::boxed(ScriptedSource::new(script))).unwrap();

        // the consumer lags; samples overflow but the terminal events must arrive
        thread::sleep(Duration::from_millis(100));
        let (_, state, rows) = wait_for_finish(&rx);
        assert_eq!(state, WorkerState::Failed);
        assert_eq!(rows, 20);
        assert_eq!(controller.stop(), Some(WorkerState::Failed));
        assert!(!controller.is_running());
    }

    #[test]
    fn stop_during_settle_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.settle_delay = Duration::from_secs(30);
        let mut controller = AcquisitionController::new(s);
        let rx = controller
            .start(ScriptedOpener::boxed(ScriptedSource::from_lines(["1.0\n"])))
            .unwrap();
        assert_eq!(controller.stop(), Some(WorkerState::Stopped));
        let (samples, state, _) = wait_for_finish(&rx);
        assert!(samples.is_empty());
        assert_eq!(state, WorkerState::Stopped);
    }
}
