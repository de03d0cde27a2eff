//! Remote Photoplethysmography (rPPG)
//!
//! Extracts heart rate from face video by tracking the subtle green-channel
//! intensity changes caused by blood volume variations in the skin.
//!
//! - `RppgEstimator` - per-face buffer, bandpass, spectral peak, BPM EMA
//! - `RppgConfig` - sample rate, buffer capacity, band edges
//! - `CalibrationState` / `RppgState` - calibration progress for display

mod estimator;

pub use estimator::{CalibrationState, RppgConfig, RppgEstimator, RppgState};
