use std::path::Path;

use crate::config::RuleThresholds;
use crate::drivers::artifact::ModelArtifact;
use crate::drivers::error::ArtifactError;
use crate::drivers::features;
use crate::types::MentalState;

/// Something that can turn a full-length voltage window into a state.
///
/// Windows shorter than `window_len` produce no decision.
pub trait StateClassifier: Send {
    fn name(&self) -> &'static str;
    fn window_len(&self) -> usize;
    fn classify(&self, window: &[f64]) -> Option<MentalState>;
}

/// Raw-voltage statistics the threshold rule looks at.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub peak: f64,
    pub frac_above_relaxed: f64,
    pub frac_above_focused: f64,
}

impl WindowStats {
    pub fn compute(window: &[f64], thresholds: &RuleThresholds) -> Option<Self> {
        if window.is_empty() {
            return None;
        }
        let n = window.len() as f64;
        let above = |level: f64| window.iter().filter(|v| **v > level).count() as f64 / n;
        Some(Self {
            mean: window.iter().sum::<f64>() / n,
            peak: window.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            frac_above_relaxed: above(thresholds.relaxed_level),
            frac_above_focused: above(thresholds.focused_level),
        })
    }
}

pub struct RuleClassifier {
    thresholds: RuleThresholds,
    window_len: usize,
}

impl RuleClassifier {
    pub fn new(thresholds: RuleThresholds, window_len: usize) -> Self {
        Self {
            thresholds,
            window_len,
        }
    }

    pub fn decide(&self, stats: &WindowStats) -> MentalState {
        let t = &self.thresholds;
        if stats.frac_above_focused >= t.focused_fraction
            || (stats.peak >= t.peak_level && stats.frac_above_focused >= t.peak_fraction)
        {
            MentalState::Focused
        } else if stats.frac_above_relaxed >= t.relaxed_fraction {
            MentalState::Relaxed
        } else {
            MentalState::Sleepy
        }
    }
}

impl StateClassifier for RuleClassifier {
    fn name(&self) -> &'static str {
        "rule-based"
    }

    fn window_len(&self) -> usize {
        self.window_len
    }

    fn classify(&self, window: &[f64]) -> Option<MentalState> {
        if self.window_len == 0 || window.len() < self.window_len {
            return None;
        }
        let window = &window[window.len() - self.window_len..];
        let stats = WindowStats::compute(window, &self.thresholds)?;
        log::debug!(
            "window mean={:.4}, peak={:.4}, frac>{}={:.3}, frac>{}={:.3}",
            stats.mean,
            stats.peak,
            self.thresholds.relaxed_level,
            stats.frac_above_relaxed,
            self.thresholds.focused_level,
            stats.frac_above_focused
        );
        Some(self.decide(&stats))
    }
}

pub struct LearnedClassifier {
    artifact: ModelArtifact,
    sample_rate_hz: f64,
    window_len: usize,
}

impl LearnedClassifier {
    pub fn new(artifact: ModelArtifact, sample_rate_hz: f64, window_len: usize) -> Self {
        if (artifact.sampling_rate_hz - sample_rate_hz).abs() > f64::EPSILON {
            log::warn!(
                "model was trained at {} Hz but acquisition runs at {} Hz",
                artifact.sampling_rate_hz,
                sample_rate_hz
            );
        }
        Self {
            artifact,
            sample_rate_hz,
            window_len,
        }
    }
}

impl StateClassifier for LearnedClassifier {
    fn name(&self) -> &'static str {
        "learned"
    }

    fn window_len(&self) -> usize {
        self.window_len
    }

    fn classify(&self, window: &[f64]) -> Option<MentalState> {
        if self.window_len == 0 || window.len() < self.window_len {
            return None;
        }
        let window = &window[window.len() - self.window_len..];
        let features = features::extract(window, self.sample_rate_hz);
        self.artifact.predict(&features)
    }
}

/// Picks the learned strategy when an artifact loads, otherwise the rule.
pub fn select_classifier(
    model_path: &Path,
    thresholds: RuleThresholds,
    sample_rate_hz: f64,
    window_len: usize,
) -> Box<dyn StateClassifier> {
    match ModelArtifact::load(model_path) {
        Ok(artifact) => {
            log::info!("loaded model from {}", model_path.display());
            Box::new(LearnedClassifier::new(artifact, sample_rate_hz, window_len))
        }
        Err(ArtifactError::Missing(path)) => {
            log::info!(
                "no model found at {}; using rule-based classification",
                path.display()
            );
            Box::new(RuleClassifier::new(thresholds, window_len))
        }
        Err(err) => {
            log::error!("could not load model: {err}; using rule-based classification");
            Box::new(RuleClassifier::new(thresholds, window_len))
        }
    }
}
