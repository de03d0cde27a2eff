//! Per-face rPPG estimator
//!
//! Stateful heart-rate engine for one tracked face:
//! - Skin ROI sampling (green channel mean)
//! - Fixed-capacity sample buffer with timestamps
//! - Detrend, bandpass, spectral peak search
//! - Slow EMA on the reported BPM
//! - Calibration state and a display waveform

use crate::dsp::{detrend, round_to, SignalFilter, SpectralEstimator};
use crate::vision::{skin_green_mean, Image, RoiFraction};

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Added to the waveform standard deviation before dividing.
const WAVEFORM_EPSILON: f64 = 1e-6;
/// Waveform z-scores are clipped to +/- this value.
const WAVEFORM_CLIP: f64 = 3.0;

/// rPPG estimator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RppgConfig {
    /// Expected frame rate (Hz)
    pub sample_rate: f64,
    /// Buffer capacity in samples; estimation starts once it is full
    pub capacity: usize,
    /// Lower edge of the heart-rate band (Hz)
    pub min_freq: f64,
    /// Upper edge of the heart-rate band (Hz)
    pub max_freq: f64,
    /// EMA weight on the previous BPM (0.9 = slow-moving display value)
    pub history_weight: f64,
    /// Default number of samples returned by `get_waveform`
    pub waveform_window: usize,
}

impl Default for RppgConfig {
    fn default() -> Self {
        Self {
            sample_rate: 15.0,
            capacity: 150, // 10 seconds at 15 fps
            min_freq: 0.75, // 45 BPM
            max_freq: 3.0,  // 180 BPM
            history_weight: 0.9,
            waveform_window: 60,
        }
    }
}

impl RppgConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err("rppg.sample_rate must be positive".to_string());
        }
        if self.capacity < 2 {
            return Err("rppg.capacity must be at least 2".to_string());
        }
        if !(self.min_freq > 0.0 && self.min_freq < self.max_freq) {
            return Err("rppg band must satisfy 0 < min_freq < max_freq".to_string());
        }
        if !(0.0..1.0).contains(&self.history_weight) {
            return Err("rppg.history_weight must be in [0, 1)".to_string());
        }
        Ok(())
    }
}

/// Calibration phase of an estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CalibrationState {
    /// Buffer still filling
    Calibrating,
    /// Buffer full, estimates are live
    Active,
}

impl CalibrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationState::Calibrating => "CALIBRATING",
            CalibrationState::Active => "ACTIVE",
        }
    }
}

/// Snapshot returned by `RppgEstimator::get_state`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RppgState {
    pub is_active: bool,
    /// Buffer fill ratio in [0, 1], rounded to 2 places
    pub progress: f64,
    pub state: CalibrationState,
}

impl RppgState {
    pub fn state_text(&self) -> &'static str {
        self.state.as_str()
    }
}

/// rPPG estimator
///
/// One instance per tracked face; created cold (`CALIBRATING`) and dropped
/// with the face.
pub struct RppgEstimator {
    config: RppgConfig,
    roi: RoiFraction,
    filter: SignalFilter,
    spectral: SpectralEstimator,
    signal_buffer: VecDeque<f64>,
    timestamps: VecDeque<f64>,
    current_bpm: Option<f64>,
    quality: f64,
}

impl RppgEstimator {
    pub fn new(config: RppgConfig) -> Self {
        Self::with_roi(config, RoiFraction::default())
    }

    pub fn with_roi(config: RppgConfig, roi: RoiFraction) -> Self {
        Self {
            filter: SignalFilter::new(config.sample_rate, config.min_freq, config.max_freq),
            spectral: SpectralEstimator::new(config.sample_rate, config.min_freq, config.max_freq),
            signal_buffer: VecDeque::with_capacity(config.capacity + 1),
            timestamps: VecDeque::with_capacity(config.capacity + 1),
            current_bpm: None,
            quality: 0.0,
            roi,
            config,
        }
    }

    /// Feed one face crop.
    ///
    /// Returns `(bpm, quality)` rounded to 1 and 2 places. An empty crop or
    /// ROI leaves the state untouched and reports zero quality.
    pub fn update(&mut self, region: &Image, timestamp: f64) -> (f64, f64) {
        match skin_green_mean(region, &self.roi) {
            Some(green) => self.push_sample(green, timestamp),
            None => (self.reported_bpm(), 0.0),
        }
    }

    /// Feed a pre-computed ROI mean (e.g. from a mobile SDK).
    ///
    /// Non-finite values are ignored like an empty crop.
    pub fn push_sample(&mut self, value: f64, timestamp: f64) -> (f64, f64) {
        if !value.is_finite() || !timestamp.is_finite() {
            log::debug!("Ignoring non-finite rPPG sample ({}, t={})", value, timestamp);
            return (self.reported_bpm(), 0.0);
        }
        self.signal_buffer.push_back(value);
        self.timestamps.push_back(timestamp);
        while self.signal_buffer.len() > self.config.capacity {
            self.signal_buffer.pop_front();
            self.timestamps.pop_front();
        }

        if self.signal_buffer.len() < self.config.capacity {
            return (self.reported_bpm(), 0.0);
        }

        self.quality = self.estimate();
        (self.reported_bpm(), round_to(self.quality, 2))
    }

    /// Recompute BPM over the full buffer; returns the quality score.
    fn estimate(&mut self) -> f64 {
        let signal: Array1<f64> = self.signal_buffer.iter().copied().collect();
        let detrended = detrend(&signal);
        let filtered = self.filter.apply_or_passthrough(&detrended);

        let Some(peak) = self.spectral.estimate(&filtered) else {
            log::debug!("no spectral bins in heart-rate band, keeping previous BPM");
            return 0.0;
        };

        let bpm = peak.bpm();
        let w = self.config.history_weight;
        self.current_bpm = Some(match self.current_bpm {
            None => bpm,
            Some(prev) => w * prev + (1.0 - w) * bpm,
        });
        peak.quality
    }

    fn reported_bpm(&self) -> f64 {
        round_to(self.current_bpm.unwrap_or(0.0), 1)
    }

    /// Calibration metadata for display
    pub fn get_state(&self) -> RppgState {
        let progress = self.signal_buffer.len() as f64 / self.config.capacity as f64;
        let is_active = progress >= 1.0;
        RppgState {
            is_active,
            progress: round_to(progress, 2),
            state: if is_active {
                CalibrationState::Active
            } else {
                CalibrationState::Calibrating
            },
        }
    }

    /// Most recent `window_size` raw samples, z-scored and clipped to [-3, 3].
    ///
    /// Empty until at least two samples are buffered.
    pub fn get_waveform(&self, window_size: usize) -> Vec<f64> {
        if self.signal_buffer.len() < 2 || window_size == 0 {
            return Vec::new();
        }
        let skip = self.signal_buffer.len().saturating_sub(window_size);
        let window: Array1<f64> = self.signal_buffer.iter().skip(skip).copied().collect();

        let mean = window.mean().unwrap_or(0.0);
        let std = crate::dsp::std(&window) + WAVEFORM_EPSILON;
        window
            .iter()
            .map(|v| round_to(((v - mean) / std).clamp(-WAVEFORM_CLIP, WAVEFORM_CLIP), 3))
            .collect()
    }

    /// Observed frame rate from buffered timestamps
    pub fn effective_sample_rate(&self) -> Option<f64> {
        let first = *self.timestamps.front()?;
        let last = *self.timestamps.back()?;
        let span = last - first;
        if self.timestamps.len() < 2 || span <= 0.0 {
            return None;
        }
        Some((self.timestamps.len() - 1) as f64 / span)
    }

    /// Clear buffers and return to `CALIBRATING`
    pub fn reset(&mut self) {
        self.signal_buffer.clear();
        self.timestamps.clear();
        self.current_bpm = None;
        self.quality = 0.0;
    }

    pub fn config(&self) -> &RppgConfig {
        &self.config
    }

    pub fn buffer_len(&self) -> usize {
        self.signal_buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Unrounded smoothed BPM, `None` before the first estimate
    pub fn current_bpm(&self) -> Option<f64> {
        self.current_bpm
    }

    /// Quality of the latest estimate
    pub fn quality(&self) -> f64 {
        self.quality
    }

    pub fn timestamps(&self) -> impl Iterator<Item = f64> + '_ {
        self.timestamps.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn green_face(g: u8) -> Image {
        Image::filled(20, 20, [90, g, 60])
    }

    fn pulse_value(freq: f64, fs: f64, i: usize) -> f64 {
        128.0 + 20.0 * (2.0 * PI * freq * i as f64 / fs).sin()
    }

    #[test]
    fn test_calibrating_until_full() {
        let config = RppgConfig {
            capacity: 30,
            ..Default::default()
        };
        let mut est = RppgEstimator::new(config);

        for i in 0..29 {
            let (bpm, quality) = est.update(&green_face(150), i as f64 / 15.0);
            assert_eq!(bpm, 0.0);
            assert_eq!(quality, 0.0);
            let state = est.get_state();
            assert_eq!(state.state_text(), "CALIBRATING");
            assert!(!state.is_active);
        }

        let (bpm, quality) = est.update(&green_face(150), 29.0 / 15.0);
        assert!(bpm.is_finite());
        assert!((0.0..=1.0).contains(&quality));
        assert_eq!(est.get_state().state_text(), "ACTIVE");
        assert_eq!(est.get_state().progress, 1.0);

        // One-way transition
        est.update(&green_face(150), 2.0);
        assert!(est.get_state().is_active);
        assert_eq!(est.buffer_len(), 30);
    }

    #[test]
    fn test_synthetic_pulse_from_images() {
        // 1.2 Hz = 72 BPM; 150 samples at 15 Hz puts it exactly on a bin
        let mut est = RppgEstimator::new(RppgConfig::default());
        let fs = est.config().sample_rate;
        let mut last = (0.0, 0.0);
        for i in 0..200 {
            let g = pulse_value(1.2, fs, i).round() as u8;
            last = est.update(&green_face(g), i as f64 / fs);
        }
        let (bpm, quality) = last;
        assert!((bpm - 72.0).abs() <= 5.0, "Expected ~72 BPM, got {}", bpm);
        assert!(quality > 0.3, "quality too low: {}", quality);
    }

    #[test]
    fn test_synthetic_pulse_samples() {
        for &freq in &[0.9, 1.5, 2.4] {
            let config = RppgConfig {
                sample_rate: 30.0,
                capacity: 300,
                ..Default::default()
            };
            let mut est = RppgEstimator::new(config);
            let mut bpm = 0.0;
            for i in 0..300 {
                bpm = est.push_sample(pulse_value(freq, 30.0, i), i as f64 / 30.0).0;
            }
            assert!(
                (bpm - freq * 60.0).abs() <= 5.0,
                "Expected ~{} BPM, got {}",
                freq * 60.0,
                bpm
            );
        }
    }

    #[test]
    fn test_bpm_ema_moves_slowly() {
        let config = RppgConfig {
            sample_rate: 30.0,
            capacity: 300,
            ..Default::default()
        };
        let mut est = RppgEstimator::new(config);
        for i in 0..300 {
            est.push_sample(pulse_value(1.0, 30.0, i), i as f64 / 30.0);
        }
        let first = est.current_bpm().unwrap();
        assert_relative_eq!(first, 60.0, epsilon = 1e-6);

        // Switch to a 2 Hz pulse: a single new sample cannot move the
        // display value by more than 10% of the jump.
        est.push_sample(pulse_value(2.0, 30.0, 300), 10.0);
        let second = est.current_bpm().unwrap();
        assert!(second - first <= 0.1 * 60.0 + 1e-9);
    }

    #[test]
    fn test_empty_region_is_noop() {
        let mut est = RppgEstimator::new(RppgConfig::default());
        est.update(&green_face(100), 0.0);
        let (bpm, quality) = est.update(&Image::empty(), 0.1);
        assert_eq!((bpm, quality), (0.0, 0.0));
        assert_eq!(est.buffer_len(), 1);

        // 1x1 crop has an empty ROI
        est.update(&Image::filled(1, 1, [0, 200, 0]), 0.2);
        assert_eq!(est.buffer_len(), 1);
    }

    #[test]
    fn test_non_finite_sample_ignored() {
        let config = RppgConfig {
            sample_rate: 30.0,
            capacity: 300,
            ..Default::default()
        };
        let mut est = RppgEstimator::new(config);
        for i in 0..300 {
            est.push_sample(pulse_value(1.0, 30.0, i), i as f64 / 30.0);
        }
        let before = est.current_bpm().unwrap();

        assert_eq!(est.push_sample(f64::NAN, 10.0), (round_to(before, 1), 0.0));
        est.push_sample(f64::INFINITY, 10.0);
        est.push_sample(128.0, f64::NAN);
        assert_eq!(est.buffer_len(), 300);
        assert_eq!(est.timestamps().last(), Some(299.0 / 30.0));

        est.push_sample(pulse_value(1.0, 30.0, 300), 10.0);
        assert!(est.current_bpm().is_some_and(f64::is_finite));
    }

    #[test]
    fn test_waveform_normalized() {
        let mut est = RppgEstimator::new(RppgConfig::default());
        assert!(est.get_waveform(60).is_empty());

        for i in 0..100 {
            est.push_sample(pulse_value(1.3, 15.0, i) + i as f64 * 0.01, i as f64 / 15.0);
        }
        let wave = est.get_waveform(60);
        assert_eq!(wave.len(), 60);
        let mean: f64 = wave.iter().sum::<f64>() / wave.len() as f64;
        assert!(mean.abs() < 0.01, "mean {}", mean);
        assert!(wave.iter().all(|v| (-3.0..=3.0).contains(v)));
    }

    #[test]
    fn test_waveform_constant_signal() {
        let mut est = RppgEstimator::new(RppgConfig::default());
        for i in 0..10 {
            est.push_sample(150.0, i as f64);
        }
        let wave = est.get_waveform(60);
        assert_eq!(wave.len(), 10);
        assert!(wave.iter().all(|&v| v == 0.0));
    }

    proptest::proptest! {
        #[test]
        fn test_waveform_bounded_and_centered(
            values in proptest::collection::vec(0.0f64..255.0, 2..120),
        ) {
            let mut est = RppgEstimator::new(RppgConfig::default());
            for (i, v) in values.iter().enumerate() {
                est.push_sample(*v, i as f64);
            }
            let wave = est.get_waveform(60);
            proptest::prop_assert_eq!(wave.len(), values.len().min(60));
            proptest::prop_assert!(wave.iter().all(|v| (-3.0..=3.0).contains(v)));
            let mean = wave.iter().sum::<f64>() / wave.len() as f64;
            proptest::prop_assert!(mean.abs() < 0.01);
        }
    }

    #[test]
    fn test_buffer_eviction_and_timestamps() {
        let config = RppgConfig {
            capacity: 20,
            ..Default::default()
        };
        let mut est = RppgEstimator::new(config);
        for i in 0..50 {
            est.push_sample(100.0, i as f64 * 0.1);
        }
        assert_eq!(est.buffer_len(), 20);
        assert_eq!(est.timestamps().count(), 20);
        assert_relative_eq!(est.timestamps().next().unwrap(), 3.0, epsilon = 1e-9);
        assert_relative_eq!(est.effective_sample_rate().unwrap(), 10.0, epsilon = 1e-6);
    }

    #[test]
    fn test_reset() {
        let mut est = RppgEstimator::new(RppgConfig {
            capacity: 20,
            ..Default::default()
        });
        for i in 0..20 {
            est.push_sample(pulse_value(1.5, 15.0, i), i as f64);
        }
        assert!(est.get_state().is_active);
        est.reset();
        assert_eq!(est.get_state().state, CalibrationState::Calibrating);
        assert_eq!(est.current_bpm(), None);
        assert_eq!(est.buffer_len(), 0);
    }

    #[test]
    fn test_config_validation() {
        assert!(RppgConfig::default().validate().is_ok());
        let bad = RppgConfig {
            capacity: 1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad_band = RppgConfig {
            min_freq: 3.0,
            max_freq: 0.75,
            ..Default::default()
        };
        assert!(bad_band.validate().is_err());
    }
}
