//! Nearest-centroid re-identification for detectors without stable track ids

use std::sync::Mutex;

use crate::collaborators::{Detection, Detector, Frame};
use crate::error::CollaboratorError;

/// Max centroid shift between frames, in normalized frame units
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.1;

struct Track {
    key: String,
    center: (f64, f64),
}

#[derive(Default)]
struct TrackerState {
    tracks: Vec<Track>,
    next_id: u64,
}

/// Detector wrapper that rewrites `entity_key`s so that a face keeps its key
/// while its box centroid moves less than `threshold` per frame.
///
/// Detections below `min_confidence` are dropped before matching, so they can
/// never claim a track. Matching is greedy on ascending distance. Unmatched
/// detections get fresh keys `face_<n>`; tracks not matched this frame are
/// forgotten.
pub struct CentroidTracker<D> {
    inner: D,
    threshold: f64,
    min_confidence: f64,
    state: Mutex<TrackerState>,
}

impl<D: Detector> CentroidTracker<D> {
    pub fn new(inner: D) -> Self {
        Self::with_threshold(inner, DEFAULT_MATCH_THRESHOLD)
    }

    pub fn with_threshold(inner: D, threshold: f64) -> Self {
        Self {
            inner,
            threshold,
            min_confidence: 0.0,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Pass the pipeline's `detector_confidence_threshold` here
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn assign(&self, detections: &mut [Detection]) -> Result<(), CollaboratorError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CollaboratorError::failed("tracker state poisoned"))?;

        let centers: Vec<(f64, f64)> = detections.iter().map(|d| d.bbox_raw.center()).collect();

        let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
        for (di, c) in centers.iter().enumerate() {
            for (ti, track) in state.tracks.iter().enumerate() {
                let dist = (c.0 - track.center.0).hypot(c.1 - track.center.1);
                if dist <= self.threshold {
                    pairs.push((dist, di, ti));
                }
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut det_key: Vec<Option<String>> = vec![None; detections.len()];
        let mut track_used = vec![false; state.tracks.len()];
        for (_, di, ti) in pairs {
            if det_key[di].is_none() && !track_used[ti] {
                det_key[di] = Some(state.tracks[ti].key.clone());
                track_used[ti] = true;
            }
        }

        let mut tracks = Vec::with_capacity(detections.len());
        for ((det, key), center) in detections.iter_mut().zip(det_key).zip(centers) {
            let key = match key {
                Some(key) => key,
                None => {
                    state.next_id += 1;
                    let key = format!("face_{}", state.next_id);
                    log::debug!("New track {}", key);
                    key
                }
            };
            det.entity_key = key.clone();
            tracks.push(Track { key, center });
        }
        state.tracks = tracks;
        Ok(())
    }
}

impl<D: Detector> Detector for CentroidTracker<D> {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, CollaboratorError> {
        let mut detections = self.inner.detect(frame)?;
        detections.retain(|d| {
            let keep = d.detector_confidence >= self.min_confidence;
            if !keep {
                log::trace!(
                    "Skipping '{}' below confidence ({:.2})",
                    d.entity_key,
                    d.detector_confidence
                );
            }
            keep
        });
        self.assign(&mut detections)?;
        Ok(detections)
    }
}
