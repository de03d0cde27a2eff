#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use facepulse_core::{
    Age, AggregatedFramePayload, BoundingBox, Classification, CollaboratorError, Collaborators,
    Demographics, DemographicsService, Detection, Detector, ExpressionClassifier, Frame,
    FusionConfig, FusionPipeline, IdentityService, Image, Publisher,
};

pub const P1_BOX: (f64, f64, f64, f64) = (0.3, 0.2, 0.5, 0.6);

pub fn p1_box() -> BoundingBox {
    BoundingBox::new(P1_BOX.0, P1_BOX.1, P1_BOX.2, P1_BOX.3)
}

/// Uniform frame whose green channel is `green`
pub fn green_frame(frame_id: u64, green: u8, fps: f64) -> Frame {
    Frame::new(
        frame_id,
        frame_id as f64 / fps,
        Image::filled(100, 100, [60, green, 60]),
    )
}

pub struct HappyClassifier;

impl ExpressionClassifier for HappyClassifier {
    fn classify(&self, _region: &Image) -> Result<Classification, CollaboratorError> {
        let probs: BTreeMap<String, f64> = [("Happy", 0.7), ("Neutral", 0.2), ("Sad", 0.1)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        Ok(Classification::from_probabilities(probs))
    }
}

pub struct FailingIdentity {
    pub calls: AtomicUsize,
}

impl IdentityService for FailingIdentity {
    fn identify(&self, _region: &Image) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CollaboratorError::failed("face gallery offline"))
    }
}

pub struct NamedIdentity(pub &'static str);

impl IdentityService for NamedIdentity {
    fn identify(&self, _region: &Image) -> Result<String, CollaboratorError> {
        Ok(self.0.to_string())
    }
}

pub struct FixedDemographics;

impl DemographicsService for FixedDemographics {
    fn analyze(&self, _region: &Image) -> Result<Demographics, CollaboratorError> {
        Ok(Demographics {
            gender: "Man".to_string(),
            age: Age::Years(41.0),
        })
    }
}

/// Reports one face "p1" at a fixed box, cropped from the frame
pub struct SingleFaceDetector;

impl Detector for SingleFaceDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, CollaboratorError> {
        Ok(vec![Detection::from_frame("p1", p1_box(), 0.92, &frame.image)])
    }
}

/// Publisher whose payloads stay readable after it is handed to a runner
#[derive(Clone, Default)]
pub struct SharedPublisher(pub Arc<Mutex<Vec<AggregatedFramePayload>>>);

impl Publisher for SharedPublisher {
    fn publish(&mut self, payload: &AggregatedFramePayload) {
        if let Ok(mut payloads) = self.0.lock() {
            payloads.push(payload.clone());
        }
    }
}

pub fn test_config(capacity: usize) -> FusionConfig {
    let mut config = FusionConfig::default();
    config.rppg.capacity = capacity;
    config.runtime.worker_threads = 2;
    config
}

pub fn pipeline_with(config: FusionConfig, identity: Arc<dyn IdentityService>) -> FusionPipeline {
    FusionPipeline::new(
        config,
        Collaborators {
            classifier: Arc::new(HappyClassifier),
            identity,
            demographics: Arc::new(FixedDemographics),
        },
    )
    .unwrap()
}
