//! Aggregated per-frame output

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use facepulse_signals::dsp::round_to;
use facepulse_signals::CalibrationState;

use crate::collaborators::BoundingBox;
use crate::throttle::{Age, Biometrics};

pub const PROBABILITY_PRECISION: u32 = 4;
pub const CONFIDENCE_PRECISION: u32 = 3;

/// One published frame: every face seen in the tick, keyed by entity key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedFramePayload {
    pub frame_id: u64,
    pub timestamp: f64,
    pub faces: BTreeMap<String, FacePayload>,
}

impl AggregatedFramePayload {
    pub fn empty(frame_id: u64, timestamp: f64) -> Self {
        Self {
            frame_id,
            timestamp,
            faces: BTreeMap::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacePayload {
    /// Smoothed box
    pub bbox: BoundingBox,
    pub biometrics: BiometricsPayload,
    /// Detector confidence for this face
    pub tracking_confidence: f64,
    pub expression: ExpressionPayload,
    pub rppg: RppgPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricsPayload {
    pub identity: String,
    pub gender: String,
    pub age: Age,
}

impl From<&Biometrics> for BiometricsPayload {
    fn from(bio: &Biometrics) -> Self {
        Self {
            identity: bio.identity.clone(),
            gender: bio.gender.clone(),
            age: bio.age.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionPayload {
    pub dominant_emotion: String,
    pub probabilities: BTreeMap<String, f64>,
    pub confidence: f64,
}

impl ExpressionPayload {
    /// Rounds probabilities and confidence for publishing
    pub fn new(
        dominant_emotion: impl Into<String>,
        probabilities: &BTreeMap<String, f64>,
        confidence: f64,
    ) -> Self {
        Self {
            dominant_emotion: dominant_emotion.into(),
            probabilities: probabilities
                .iter()
                .map(|(k, v)| (k.clone(), round_to(*v, PROBABILITY_PRECISION)))
                .collect(),
            confidence: round_to(confidence, CONFIDENCE_PRECISION),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RppgPayload {
    pub bpm: f64,
    pub waveform: Vec<f64>,
    pub quality_score: f64,
    pub calibration_state: CalibrationState,
    /// Buffer fill ratio
    pub progress: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_face() -> FacePayload {
        let probs: BTreeMap<String, f64> = [("Happy", 0.666666), ("Sad", 0.333334)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        FacePayload {
            bbox: BoundingBox::new(0.3, 0.2, 0.5, 0.6),
            biometrics: BiometricsPayload {
                identity: "Guest".to_string(),
                gender: "Unknown".to_string(),
                age: Age::Label("Unknown".to_string()),
            },
            tracking_confidence: 0.91,
            expression: ExpressionPayload::new("Happy", &probs, 0.666666),
            rppg: RppgPayload {
                bpm: 72.0,
                waveform: vec![0.0, 1.0, -1.0],
                quality_score: 0.42,
                calibration_state: CalibrationState::Active,
                progress: 1.0,
            },
        }
    }

    #[test]
    fn test_expression_rounding() {
        let face = sample_face();
        assert_eq!(face.expression.probabilities["Happy"], 0.6667);
        assert_eq!(face.expression.probabilities["Sad"], 0.3333);
        assert_eq!(face.expression.confidence, 0.667);
    }

    #[test]
    fn test_json_shape() {
        let mut payload = AggregatedFramePayload::empty(7, 1.25);
        payload.faces.insert("p1".to_string(), sample_face());

        let value: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(value["frame_id"], 7);
        let face = &value["faces"]["p1"];
        assert_eq!(face["bbox"]["x_min"], 0.3);
        assert_eq!(face["biometrics"]["age"], "Unknown");
        assert_eq!(face["expression"]["dominant_emotion"], "Happy");
        assert_eq!(face["rppg"]["calibration_state"], "ACTIVE");
        assert_eq!(face["rppg"]["waveform"].as_array().map(|a| a.len()), Some(3));
    }
}
