use rustfft::{num_complex::Complex64, FftPlanner};

/// One-sided power spectrum of a real signal.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerSpectrum {
    pub frequencies_hz: Vec<f64>,
    pub power: Vec<f64>, // |X[k]|^2
}

impl PowerSpectrum {
    /// Computes `|rfft(x)|^2` on the grid `k * fs / n`, `k = 0..=n/2`.
    pub fn of_real(signal: &[f64], sample_rate_hz: f64) -> Self {
        let n = signal.len();
        if n == 0 {
            return Self {
                frequencies_hz: Vec::new(),
                power: Vec::new(),
            };
        }
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(n);
        let mut buffer: Vec<Complex64> = signal.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        fft.process(&mut buffer);
        let bins = n / 2 + 1;
        let frequencies_hz = (0..bins)
            .map(|k| k as f64 * sample_rate_hz / n as f64)
            .collect();
        let power = buffer.iter().take(bins).map(|c| c.norm_sqr()).collect();
        Self {
            frequencies_hz,
            power,
        }
    }

    /// Trapezoidal integral of the power over bins with `low <= f <= high`.
    ///
    /// Both edges are inclusive, so a bin sitting exactly on a shared band
    /// edge counts toward both neighbouring bands. Fewer than two bins in
    /// range integrate to zero.
    pub fn band_power(&self, low_hz: f64, high_hz: f64) -> f64 {
        let selected: Vec<(f64, f64)> = self
            .frequencies_hz
            .iter()
            .zip(&self.power)
            .filter(|(f, _)| **f >= low_hz && **f <= high_hz)
            .map(|(f, p)| (*f, *p))
            .collect();
        selected
            .windows(2)
            .map(|pair| (pair[1].0 - pair[0].0) * (pair[0].1 + pair[1].1) * 0.5)
            .sum()
    }
}
