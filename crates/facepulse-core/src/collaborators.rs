//! External collaborator seams
//!
//! The detector, expression classifier, identity and demographics models,
//! the frame source and the publisher are all black boxes to the fusion
//! core. Each is a trait here so that real models, mocks and synthetic
//! sources plug into the same pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use facepulse_signals::Image;

use crate::error::CollaboratorError;
use crate::payload::AggregatedFramePayload;
use crate::throttle::Age;

/// One captured frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonically increasing per source
    pub frame_id: u64,
    /// Capture time in seconds
    pub timestamp: f64,
    pub image: Arc<Image>,
}

impl Frame {
    pub fn new(frame_id: u64, timestamp: f64, image: Image) -> Self {
        Self {
            frame_id,
            timestamp,
            image: Arc::new(image),
        }
    }
}

/// Normalized bounding box, coordinates in [0, 1] of the frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.x_min, self.y_min, self.x_max, self.y_max]
    }

    pub fn from_array(a: [f64; 4]) -> Self {
        Self::new(a[0], a[1], a[2], a[3])
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }
}

/// One face reported by the detector
#[derive(Debug, Clone)]
pub struct Detection {
    /// Track id assigned by the detector, stable across frames
    pub entity_key: String,
    pub bbox_raw: BoundingBox,
    pub detector_confidence: f64,
    /// Cropped face pixels
    pub region: Arc<Image>,
}

impl Detection {
    pub fn new(
        entity_key: impl Into<String>,
        bbox_raw: BoundingBox,
        detector_confidence: f64,
        region: Image,
    ) -> Self {
        Self {
            entity_key: entity_key.into(),
            bbox_raw,
            detector_confidence,
            region: Arc::new(region),
        }
    }

    /// Crop the face out of `frame` using the normalized box
    pub fn from_frame(
        entity_key: impl Into<String>,
        bbox_raw: BoundingBox,
        detector_confidence: f64,
        frame: &Image,
    ) -> Self {
        let region = frame.crop_normalized(bbox_raw.to_array());
        Self::new(entity_key, bbox_raw, detector_confidence, region)
    }
}

/// Raw expression classifier output
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub dominant: String,
    pub confidence: f64,
    pub probabilities: BTreeMap<String, f64>,
}

impl Classification {
    /// Dominant label taken as the arg-max of `probabilities`
    pub fn from_probabilities(probabilities: BTreeMap<String, f64>) -> Self {
        let (dominant, confidence) = crate::smoother::arg_max(&probabilities)
            .map(|(label, p)| (label.to_string(), p))
            .unwrap_or_default();
        Self {
            dominant,
            confidence,
            probabilities,
        }
    }
}

/// Demographic estimate
#[derive(Debug, Clone, PartialEq)]
pub struct Demographics {
    pub gender: String,
    pub age: Age,
}

pub trait FrameSource: Send {
    /// Next frame, or None when the source is exhausted
    fn next_frame(&mut self) -> Option<Frame>;

    /// Release the underlying device
    fn close(&mut self) {}
}

pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, CollaboratorError>;
}

pub trait ExpressionClassifier: Send + Sync {
    fn classify(&self, region: &Image) -> Result<Classification, CollaboratorError>;
}

pub trait IdentityService: Send + Sync {
    fn identify(&self, region: &Image) -> Result<String, CollaboratorError>;
}

pub trait DemographicsService: Send + Sync {
    fn analyze(&self, region: &Image) -> Result<Demographics, CollaboratorError>;
}

/// Sink for aggregated frames. Delivery is fire-and-forget.
pub trait Publisher: Send {
    fn publish(&mut self, payload: &AggregatedFramePayload);
}

/// Publisher that keeps every payload in memory
#[derive(Debug, Default)]
pub struct CollectingPublisher {
    pub payloads: Vec<AggregatedFramePayload>,
}

impl Publisher for CollectingPublisher {
    fn publish(&mut self, payload: &AggregatedFramePayload) {
        self.payloads.push(payload.clone());
    }
}

/// Frame source backed by a pre-built list of frames
#[derive(Debug, Default)]
pub struct VecFrameSource {
    frames: std::collections::VecDeque<Frame>,
}

impl VecFrameSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl FrameSource for VecFrameSource {
    fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }
}
