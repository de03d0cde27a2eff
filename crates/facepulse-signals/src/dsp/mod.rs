//! DSP (Digital Signal Processing) module
//!
//! Signal processing utilities for the rPPG chain.
//!
//! - `SignalFilter` - zero-phase Butterworth bandpass
//! - `SpectralEstimator` - FFT dominant frequency search with a quality score
//! - `detrend`, `std`, `round_to` - small shared helpers

mod filters;
mod spectral;

pub use filters::{FilterError, SignalFilter};
pub use spectral::{SpectralEstimator, SpectralPeak, QUALITY_EPSILON};

use ndarray::Array1;

/// Detrend signal (remove mean)
pub fn detrend(signal: &Array1<f64>) -> Array1<f64> {
    let mean = signal.mean().unwrap_or(0.0);
    signal.mapv(|x| x - mean)
}

/// Population standard deviation
pub fn std(arr: &Array1<f64>) -> f64 {
    let mean = arr.mean().unwrap_or(0.0);
    let variance = arr.mapv(|x| (x - mean).powi(2)).mean().unwrap_or(0.0);
    variance.sqrt()
}

/// Round to a fixed number of decimal places.
///
/// Used only at output boundaries; internal state keeps full precision.
#[inline]
pub fn round_to(value: f64, places: u32) -> f64 {
    let scale = 10f64.powi(places as i32);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_detrend_zero_mean() {
        let arr = Array1::from(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = detrend(&arr);
        assert_relative_eq!(out.mean().unwrap(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(out[0], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_std() {
        let arr = Array1::from(vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_relative_eq!(std(&arr), 2.0, epsilon = 1e-12);
        assert_eq!(std(&Array1::from(vec![3.0, 3.0])), 0.0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(72.3456, 1), 72.3);
        assert_eq!(round_to(0.126, 2), 0.13);
        assert_eq!(round_to(0.12344, 4), 0.1234);
    }
}
