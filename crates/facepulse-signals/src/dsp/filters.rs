//! Bandpass filtering for evenly-sampled pulse signals
//!
//! Second-order Butterworth high-pass and low-pass sections (bilinear
//! transform with pre-warping) cascaded into a bandpass and run forward
//! and backward for zero phase distortion.

use ndarray::Array1;
use std::f64::consts::{PI, SQRT_2};
use thiserror::Error;

/// Samples of odd-extension padding on each side, 3 x (2 * order + 1)
/// for the order-2 band design.
pub const PAD_LEN: usize = 15;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("signal too short for filtering: {len} samples, need more than {required}")]
    InsufficientSamples { len: usize, required: usize },
    #[error("infeasible band {low_hz}-{high_hz} Hz at sample rate {sample_rate} Hz")]
    InvalidBand {
        low_hz: f64,
        high_hz: f64,
        sample_rate: f64,
    },
    #[error("filter produced non-finite output")]
    NonFinite,
}

/// One second-order section in direct form I.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b: [f64; 3],
    a: [f64; 2],
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    fn new(b: [f64; 3], a: [f64; 2]) -> Self {
        Self {
            b,
            a,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    fn butter_lowpass(cutoff: f64, fs: f64) -> Self {
        let k = (PI * cutoff / fs).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + SQRT_2 * k + k2);
        let b0 = k2 * norm;
        Self::new(
            [b0, 2.0 * b0, b0],
            [2.0 * (k2 - 1.0) * norm, (1.0 - SQRT_2 * k + k2) * norm],
        )
    }

    fn butter_highpass(cutoff: f64, fs: f64) -> Self {
        let k = (PI * cutoff / fs).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + SQRT_2 * k + k2);
        Self::new(
            [norm, -2.0 * norm, norm],
            [2.0 * (k2 - 1.0) * norm, (1.0 - SQRT_2 * k + k2) * norm],
        )
    }

    fn dc_gain(&self) -> f64 {
        let den = 1.0 + self.a[0] + self.a[1];
        if den.abs() < 1e-15 {
            0.0
        } else {
            (self.b[0] + self.b[1] + self.b[2]) / den
        }
    }

    /// Set the state to the steady response of a constant input `x0`.
    /// Returns the steady output, which primes the next section.
    fn prime(&mut self, x0: f64) -> f64 {
        let y0 = x0 * self.dc_gain();
        self.x1 = x0;
        self.x2 = x0;
        self.y1 = y0;
        self.y2 = y0;
        y0
    }

    #[inline]
    fn step(&mut self, x: f64) -> f64 {
        let y = self.b[0] * x + self.b[1] * self.x1 + self.b[2] * self.x2
            - self.a[0] * self.y1
            - self.a[1] * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// Zero-phase Butterworth bandpass filter
#[derive(Debug, Clone)]
pub struct SignalFilter {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// High-pass corner (Hz)
    pub low_hz: f64,
    /// Low-pass corner (Hz)
    pub high_hz: f64,
}

impl Default for SignalFilter {
    fn default() -> Self {
        Self {
            sample_rate: 30.0,
            low_hz: 0.75, // 45 BPM
            high_hz: 3.0, // 180 BPM
        }
    }
}

impl SignalFilter {
    pub fn new(sample_rate: f64, low_hz: f64, high_hz: f64) -> Self {
        Self {
            sample_rate,
            low_hz,
            high_hz,
        }
    }

    /// Check the band against the Nyquist limit.
    pub fn validate(&self) -> Result<(), FilterError> {
        let nyquist = self.sample_rate / 2.0;
        let feasible = self.sample_rate.is_finite()
            && self.sample_rate > 0.0
            && self.low_hz > 0.0
            && self.low_hz < self.high_hz
            && self.high_hz < nyquist;
        if feasible {
            Ok(())
        } else {
            Err(FilterError::InvalidBand {
                low_hz: self.low_hz,
                high_hz: self.high_hz,
                sample_rate: self.sample_rate,
            })
        }
    }

    fn design(&self) -> Result<[Biquad; 2], FilterError> {
        self.validate()?;
        Ok([
            Biquad::butter_highpass(self.low_hz, self.sample_rate),
            Biquad::butter_lowpass(self.high_hz, self.sample_rate),
        ])
    }

    /// Filter forward and backward over an odd-extended copy of `signal`.
    pub fn apply(&self, signal: &Array1<f64>) -> Result<Array1<f64>, FilterError> {
        let n = signal.len();
        if n <= PAD_LEN {
            return Err(FilterError::InsufficientSamples {
                len: n,
                required: PAD_LEN,
            });
        }
        let sections = self.design()?;

        let first = signal[0];
        let last = signal[n - 1];
        let mut ext = Vec::with_capacity(n + 2 * PAD_LEN);
        ext.extend((1..=PAD_LEN).rev().map(|i| 2.0 * first - signal[i]));
        ext.extend(signal.iter().copied());
        ext.extend((1..=PAD_LEN).map(|i| 2.0 * last - signal[n - 1 - i]));

        Self::run_cascade(sections, &mut ext);
        ext.reverse();
        Self::run_cascade(sections, &mut ext);
        ext.reverse();

        let out: Array1<f64> = ext[PAD_LEN..PAD_LEN + n].iter().copied().collect();
        if out.iter().all(|v| v.is_finite()) {
            Ok(out)
        } else {
            Err(FilterError::NonFinite)
        }
    }

    /// Filter, or hand back the input unchanged when filtering is not possible.
    pub fn apply_or_passthrough(&self, signal: &Array1<f64>) -> Array1<f64> {
        match self.apply(signal) {
            Ok(filtered) => filtered,
            Err(e) => {
                log::debug!("bandpass skipped, using unfiltered signal: {}", e);
                signal.clone()
            }
        }
    }

    fn run_cascade(mut sections: [Biquad; 2], data: &mut [f64]) {
        let mut x0 = data[0];
        for section in sections.iter_mut() {
            x0 = section.prime(x0);
        }
        for v in data.iter_mut() {
            let mut y = *v;
            for section in sections.iter_mut() {
                y = section.step(y);
            }
            *v = y;
        }
    }
}
