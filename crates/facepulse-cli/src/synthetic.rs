//! Synthetic camera and perception models for running the pipeline without hardware

use std::collections::BTreeMap;
use std::f64::consts::PI;

use facepulse_core::{
    Age, BoundingBox, Classification, CollaboratorError, Demographics, DemographicsService,
    Detection, Detector, ExpressionClassifier, Frame, FrameSource, IdentityService, Image,
    EMOTION_CLASSES,
};

const WIDTH: u32 = 160;
const HEIGHT: u32 = 120;
const BACKGROUND: [u8; 3] = [40, 40, 48];
const FACE_SIZE: f64 = 0.22;

/// Faces drifting across a static background, skin green pulsing at `bpm`
#[derive(Debug, Clone)]
pub struct Scene {
    pub faces: usize,
    pub bpm: f64,
    pub fps: f64,
}

impl Scene {
    pub fn boxes(&self, timestamp: f64) -> Vec<BoundingBox> {
        (0..self.faces)
            .map(|k| {
                let lane = (k as f64 + 0.5) / self.faces as f64;
                let cx = lane + 0.02 * (0.5 * timestamp + k as f64).sin();
                let cy = 0.45 + 0.01 * (0.3 * timestamp).cos();
                let half = FACE_SIZE / 2.0;
                BoundingBox::new(cx - half, cy - half, cx + half, cy + half)
            })
            .collect()
    }

    fn render(&self, timestamp: f64) -> Image {
        let mut image = Image::filled(WIDTH, HEIGHT, BACKGROUND);
        for (k, bbox) in self.boxes(timestamp).into_iter().enumerate() {
            let phase = k as f64 * 0.7;
            let pulse = (2.0 * PI * self.bpm / 60.0 * timestamp + phase).sin();
            let skin = [190, (135.0 + 6.0 * pulse).round() as u8, 110];

            let x0 = (bbox.x_min.clamp(0.0, 1.0) * WIDTH as f64) as u32;
            let x1 = (bbox.x_max.clamp(0.0, 1.0) * WIDTH as f64) as u32;
            let y0 = (bbox.y_min.clamp(0.0, 1.0) * HEIGHT as f64) as u32;
            let y1 = (bbox.y_max.clamp(0.0, 1.0) * HEIGHT as f64) as u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    image.set_pixel(x, y, skin);
                }
            }
        }
        image
    }
}

pub struct SyntheticCamera {
    scene: Scene,
    next_id: u64,
    frames: u64,
}

impl SyntheticCamera {
    pub fn new(scene: Scene, frames: u64) -> Self {
        Self {
            scene,
            next_id: 0,
            frames,
        }
    }
}

impl FrameSource for SyntheticCamera {
    fn next_frame(&mut self) -> Option<Frame> {
        if self.next_id >= self.frames {
            return None;
        }
        let timestamp = self.next_id as f64 / self.scene.fps;
        let frame = Frame::new(self.next_id, timestamp, self.scene.render(timestamp));
        self.next_id += 1;
        Some(frame)
    }

    fn close(&mut self) {
        log::debug!("Synthetic camera closed after {} frames", self.next_id);
    }
}

/// Reports the scene's boxes with index keys, the way an untracked detector would
pub struct SceneDetector {
    pub scene: Scene,
}

impl Detector for SceneDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, CollaboratorError> {
        Ok(self
            .scene
            .boxes(frame.timestamp)
            .into_iter()
            .enumerate()
            .map(|(i, bbox)| Detection::from_frame(i.to_string(), bbox, 0.9, &frame.image))
            .collect())
    }
}

/// Maps crop brightness onto a mostly neutral, slightly happy distribution
pub struct BrightnessClassifier;

impl ExpressionClassifier for BrightnessClassifier {
    fn classify(&self, region: &Image) -> Result<Classification, CollaboratorError> {
        let [r, g, b] = region
            .mean_rgb()
            .ok_or_else(|| CollaboratorError::failed("empty face crop"))?;
        let brightness = (r + g + b) / (3.0 * 255.0);

        let mut probs: BTreeMap<String, f64> = EMOTION_CLASSES
            .iter()
            .map(|label| (label.to_string(), 0.05))
            .collect();
        probs.insert("Neutral".to_string(), 0.5);
        probs.insert("Happy".to_string(), 0.2 + 0.2 * brightness);
        let total: f64 = probs.values().sum();
        probs.values_mut().for_each(|p| *p /= total);
        Ok(Classification::from_probabilities(probs))
    }
}

pub struct GuestIdentity;

impl IdentityService for GuestIdentity {
    fn identify(&self, _region: &Image) -> Result<String, CollaboratorError> {
        Ok("Visitor".to_string())
    }
}

pub struct FixedDemographics;

impl DemographicsService for FixedDemographics {
    fn analyze(&self, _region: &Image) -> Result<Demographics, CollaboratorError> {
        Ok(Demographics {
            gender: "Unknown".to_string(),
            age: Age::Years(30.0),
        })
    }
}
