// src/drivers/mod.rs
// 声明同级目录下的子模块文件
pub mod artifact;
pub mod buffer;
pub mod classifier;
pub mod error;
pub mod features;
pub mod fft;
pub mod forest;
pub mod parser;
pub mod pipeline;
pub mod source;
// 公开导出这些模块里的结构体，方便外部调用
pub use artifact::{ModelArtifact, ARTIFACT_FORMAT_VERSION};
pub use buffer::SampleBuffer;
pub use classifier::{
    select_classifier, LearnedClassifier, RuleClassifier, StateClassifier, WindowStats,
};
pub use error::{AcquisitionError, ArtifactError, DatasetError};
pub use features::{extract, FeatureVector, BANDS, FEATURE_COUNT};
pub use fft::PowerSpectrum;
pub use forest::{ForestParams, RandomForest};
pub use parser::{parse_bytes, parse_line, ParsedLine};
pub use pipeline::{LiveView, ReplaySummary, StatePipeline, TickReport};
pub use source::{LineSource, ScriptedSource, SerialLineSource, SerialOpener, SourceOpener};
