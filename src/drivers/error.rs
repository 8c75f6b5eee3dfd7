use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("could not open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial read error: {0}")]
    Read(#[source] std::io::Error),
    #[error("run log error at {path}: {source}")]
    RunLog {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("could not create data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn reader thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("acquisition is already running")]
    AlreadyRunning,
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("no model artifact at {0}")]
    Missing(PathBuf),
    #[error("failed to access model artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt model artifact {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported artifact format version {0}")]
    UnsupportedVersion(u32),
    #[error("model expects {actual} features, extractor produces {expected}")]
    FeatureMismatch { expected: usize, actual: usize },
    #[error("invalid model artifact: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("dataset must contain a 'label' column")]
    MissingLabelColumn,
    #[error("dataset must have columns named like 'voltage_0', 'voltage_1', ...")]
    MissingVoltageColumns,
    #[error("row {row}: missing or non-numeric value in column '{column}'")]
    BadCell { row: usize, column: String },
    #[error("row {row}: {source}")]
    UnknownLabel {
        row: usize,
        #[source]
        source: crate::types::UnknownLabel,
    },
    #[error("dataset is empty")]
    Empty,
    #[error("class {class} has {count} rows; a stratified split needs at least 2")]
    TooFewRows { class: String, count: usize },
}
