//! facepulse core: real-time fusion of per-frame face perception outputs.
//!
//! Each tick takes one frame plus the detector's face set and produces one
//! `AggregatedFramePayload` with smoothed boxes, smoothed expression
//! distributions, throttled identity/demographics, and an rPPG heart rate
//! per tracked face.
//!
//! Perception models are external collaborators (see `collaborators`). Their
//! calls run on a `WorkerPool`; all entity state is mutated by the single
//! thread that drives `FusionPipeline::tick`.

#![allow(clippy::new_without_default)]

pub mod collaborators;
pub mod config;
pub mod entity;
pub mod error;
pub mod frame_queue;
pub mod payload;
pub mod pipeline;
pub mod runner;
pub mod smoother;
pub mod throttle;
pub mod tracker;
pub mod worker;

pub use collaborators::{
    BoundingBox, Classification, CollectingPublisher, DemographicsService, Demographics,
    Detection, Detector, ExpressionClassifier, Frame, FrameSource, IdentityService, Publisher,
    VecFrameSource,
};
pub use config::{ConfigError, FusionConfig, EMOTION_CLASSES};
pub use entity::{EntityAggregate, EntityStateStore};
pub use error::{CollaboratorError, FusionError};
pub use frame_queue::{CaptureThread, LatestFrameQueue, QueueMetricsSnapshot};
pub use payload::{AggregatedFramePayload, FacePayload};
pub use pipeline::{Collaborators, FusionPipeline};
pub use runner::{FusionRunner, RunSummary, StopHandle};
pub use smoother::{BoxSmoother, DistributionSmoother, Smoother, SmootherError};
pub use throttle::{Age, Biometrics, ThrottledRefreshPolicy};
pub use tracker::CentroidTracker;
pub use worker::{WorkerError, WorkerMetricsSnapshot, WorkerPool};

pub use facepulse_signals::{CalibrationState, Image, RppgConfig};
