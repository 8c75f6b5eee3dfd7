use serde::{Deserialize, Serialize};

use crate::drivers::fft::PowerSpectrum;

pub const FEATURE_COUNT: usize = 9;

/// Frequency band used for a band-power feature (inclusive edges, Hz).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Band {
    pub name: &'static str,
    pub low_hz: f64,
    pub high_hz: f64,
}

pub const BANDS: [Band; 4] = [
    Band { name: "delta", low_hz: 0.5, high_hz: 4.0 },
    Band { name: "theta", low_hz: 4.0, high_hz: 8.0 },
    Band { name: "alpha", low_hz: 8.0, high_hz: 13.0 },
    Band { name: "beta", low_hz: 13.0, high_hz: 30.0 },
];

/// Time-domain statistics followed by the four band powers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub peak_to_peak: f64,
    pub delta: f64,
    pub theta: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.mean,
            self.std,
            self.min,
            self.max,
            self.peak_to_peak,
            self.delta,
            self.theta,
            self.alpha,
            self.beta,
        ]
    }
}

/// Extracts the feature vector of one window. An empty window yields all zeros.
pub fn extract(window: &[f64], sample_rate_hz: f64) -> FeatureVector {
    if window.is_empty() {
        return FeatureVector::default();
    }
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let variance = window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let min = window.iter().copied().fold(f64::INFINITY, f64::min);
    let max = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let centered: Vec<f64> = window.iter().map(|v| v - mean).collect();
    let spectrum = PowerSpectrum::of_real(&centered, sample_rate_hz);
    let [delta, theta, alpha, beta] = BANDS.map(|b| spectrum.band_power(b.low_hz, b.high_hz));

    FeatureVector {
        mean,
        std: variance.sqrt(),
        min,
        max,
        peak_to_peak: max - min,
        delta,
        theta,
        alpha,
        beta,
    }
}
