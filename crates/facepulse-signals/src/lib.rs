//! # facepulse-signals
//!
//! Pulse signal processing for facepulse.
//!
//! This crate provides:
//! - **rPPG estimation**: green-channel heart rate extraction from face crops
//! - **DSP functions**: Butterworth bandpass, FFT peak search, signal helpers
//! - **Vision primitives**: RGB8 image buffers and skin ROI selection
//!
//! ## Example
//!
//! ```ignore
//! use facepulse_signals::{RppgConfig, RppgEstimator};
//!
//! let mut estimator = RppgEstimator::new(RppgConfig::default());
//!
//! // Feed one face crop per frame
//! for (crop, ts) in face_crops {
//!     let (bpm, quality) = estimator.update(&crop, ts);
//!     println!("Heart rate: {:.1} BPM (quality: {:.2})", bpm, quality);
//! }
//! ```

pub mod dsp;
pub mod rppg;
pub mod vision;

pub use dsp::{FilterError, SignalFilter, SpectralEstimator, SpectralPeak};
pub use rppg::{CalibrationState, RppgConfig, RppgEstimator, RppgState};
pub use vision::{Image, ImageError};
