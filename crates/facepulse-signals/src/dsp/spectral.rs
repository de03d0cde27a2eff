//! Spectral peak search
//!
//! FFT magnitude spectrum restricted to a frequency band, with a crude
//! signal-to-noise quality score for the winning bin.

use ndarray::Array1;
use num_complex::Complex64;
use rustfft::FftPlanner;

/// Added to the quality denominator so flat spectra never divide by zero.
pub const QUALITY_EPSILON: f64 = 1e-6;

/// Dominant in-band spectral component
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralPeak {
    /// Frequency of the strongest in-band bin (Hz)
    pub frequency_hz: f64,
    /// Magnitude of that bin
    pub magnitude: f64,
    /// Mean magnitude over all in-band bins
    pub band_mean: f64,
    /// `peak / (5 * band_mean + eps)`, clipped to [0, 1]
    pub quality: f64,
}

impl SpectralPeak {
    pub fn bpm(&self) -> f64 {
        self.frequency_hz * 60.0
    }
}

/// FFT-based dominant frequency estimator
pub struct SpectralEstimator {
    sample_rate: f64,
    min_freq: f64,
    max_freq: f64,
    fft_planner: FftPlanner<f64>,
}

impl SpectralEstimator {
    pub fn new(sample_rate: f64, min_freq: f64, max_freq: f64) -> Self {
        Self {
            sample_rate,
            min_freq,
            max_freq,
            fft_planner: FftPlanner::new(),
        }
    }

    /// Heart-rate band defaults (0.75-3.0 Hz)
    pub fn heart_rate(sample_rate: f64) -> Self {
        Self::new(sample_rate, 0.75, 3.0)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Magnitude spectrum of the non-negative frequency bins as
    /// `(frequency_hz, magnitude)` pairs.
    pub fn magnitude_spectrum(&mut self, signal: &Array1<f64>) -> Vec<(f64, f64)> {
        let n = signal.len();
        if n == 0 || self.sample_rate <= 0.0 {
            return Vec::new();
        }

        let mut buffer: Vec<Complex64> = signal.iter().map(|&s| Complex64::new(s, 0.0)).collect();
        let fft = self.fft_planner.plan_fft_forward(n);
        fft.process(&mut buffer);

        let bin_res = self.sample_rate / n as f64;
        let positive_bins = (n + 1) / 2;
        buffer
            .iter()
            .take(positive_bins)
            .enumerate()
            .map(|(k, c)| (k as f64 * bin_res, c.norm()))
            .collect()
    }

    /// Find the strongest bin inside `[min_freq, max_freq]`.
    ///
    /// Returns `None` when no bin falls inside the band. Ties go to the
    /// lowest frequency.
    pub fn estimate(&mut self, signal: &Array1<f64>) -> Option<SpectralPeak> {
        let (min_freq, max_freq) = (self.min_freq, self.max_freq);
        let in_band: Vec<(f64, f64)> = self
            .magnitude_spectrum(signal)
            .into_iter()
            .filter(|&(f, _)| f >= min_freq && f <= max_freq)
            .collect();

        let (mut frequency_hz, mut magnitude) = *in_band.first()?;
        for &(f, m) in in_band.iter().skip(1) {
            if m > magnitude {
                frequency_hz = f;
                magnitude = m;
            }
        }

        let band_mean = in_band.iter().map(|&(_, m)| m).sum::<f64>() / in_band.len() as f64;
        let quality = (magnitude / (band_mean * 5.0 + QUALITY_EPSILON)).clamp(0.0, 1.0);

        Some(SpectralPeak {
            frequency_hz,
            magnitude,
            band_mean,
            quality,
        })
    }
}
