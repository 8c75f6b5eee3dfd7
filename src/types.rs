// src/types.rs
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mental state predicted from a voltage window.
///
/// The integer codes are the ones used by training datasets and by the
/// persisted model artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MentalState {
    Relaxed,
    Focused,
    Sleepy,
}

impl MentalState {
    pub const ALL: [MentalState; 3] = [MentalState::Relaxed, MentalState::Focused, MentalState::Sleepy];

    pub fn code(self) -> usize {
        match self {
            MentalState::Relaxed => 0,
            MentalState::Focused => 1,
            MentalState::Sleepy => 2,
        }
    }

    pub fn from_code(code: usize) -> Option<Self> {
        match code {
            0 => Some(MentalState::Relaxed),
            1 => Some(MentalState::Focused),
            2 => Some(MentalState::Sleepy),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MentalState::Relaxed => "Relaxed",
            MentalState::Focused => "Focused",
            MentalState::Sleepy => "Sleepy",
        }
    }

    /// Display colour used by the status line.
    pub fn color(self) -> &'static str {
        match self {
            MentalState::Relaxed => "green",
            MentalState::Focused => "blue",
            MentalState::Sleepy => "orange",
        }
    }
}

impl fmt::Display for MentalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Label text that is neither a known state name nor a known code.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unrecognized label '{0}'")]
pub struct UnknownLabel(pub String);

impl FromStr for MentalState {
    type Err = UnknownLabel;

    /// Accepts `relaxed` / `focused` / `sleepy` in any case, or the codes `0` / `1` / `2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<usize>() {
            return MentalState::from_code(code).ok_or_else(|| UnknownLabel(s.to_owned()));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "relaxed" => Ok(MentalState::Relaxed),
            "focused" => Ok(MentalState::Focused),
            "sleepy" => Ok(MentalState::Sleepy),
            _ => Err(UnknownLabel(s.to_owned())),
        }
    }
}

/// One accepted reading from the device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub captured_at: DateTime<Utc>,
    pub raw: Option<u32>,
    pub voltage: f64,
}

// 采集线程的状态机
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Connecting,
    Streaming,
    Stopped,
    Failed,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Failed)
    }
}

// 后台发给前台的消息
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    State(WorkerState),
    LogOpened(PathBuf),
    Sample(Sample),
    Finished { state: WorkerState, rows_logged: u64 },
}
