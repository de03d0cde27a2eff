//! Per-entity state and the store that owns it

use std::collections::{HashMap, HashSet};

use facepulse_signals::{RppgConfig, RppgEstimator};

use crate::config::FusionConfig;
use crate::error::FusionError;
use crate::smoother::{BoxSmoother, DistributionSmoother};
use crate::throttle::Biometrics;

/// Everything the pipeline remembers about one tracked face
pub struct EntityAggregate {
    pub box_smoother: BoxSmoother,
    pub emotion_smoother: DistributionSmoother,
    /// `None` until the first refresh attempt
    pub biometrics: Option<Biometrics>,
    pub rppg: RppgEstimator,
    pub first_seen_frame: u64,
    pub last_seen_frame: u64,
}

impl EntityAggregate {
    /// Frames between first and latest sighting
    pub fn age_frames(&self) -> u64 {
        self.last_seen_frame.saturating_sub(self.first_seen_frame)
    }
}

/// Keyed store of live entities.
///
/// Owned by a single pipeline. An aggregate lives exactly as long as its key
/// keeps appearing in consecutive detection sets.
pub struct EntityStateStore {
    box_template: BoxSmoother,
    emotion_template: DistributionSmoother,
    rppg_config: RppgConfig,
    entities: HashMap<String, EntityAggregate>,
}

impl EntityStateStore {
    pub fn new(config: &FusionConfig) -> Result<Self, FusionError> {
        Ok(Self {
            box_template: BoxSmoother::new(config.smoothing.box_alpha)?,
            emotion_template: DistributionSmoother::new(config.smoothing.emotion_alpha)?,
            rppg_config: config.rppg.clone(),
            entities: HashMap::new(),
        })
    }

    /// Existing aggregate for `key`, or a cold one created at `frame_id`
    pub fn resolve(&mut self, key: &str, frame_id: u64) -> &mut EntityAggregate {
        let aggregate = self.entities.entry(key.to_string()).or_insert_with(|| {
            log::debug!("New entity '{}' at frame {}", key, frame_id);
            EntityAggregate {
                box_smoother: self.box_template.clone(),
                emotion_smoother: self.emotion_template.clone(),
                biometrics: None,
                rppg: RppgEstimator::new(self.rppg_config.clone()),
                first_seen_frame: frame_id,
                last_seen_frame: frame_id,
            }
        });
        aggregate.last_seen_frame = frame_id;
        aggregate
    }

    pub fn get(&self, key: &str) -> Option<&EntityAggregate> {
        self.entities.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entities.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Drop every aggregate whose key is not in `seen`; returns the removed keys sorted
    pub fn retain_seen(&mut self, seen: &HashSet<String>) -> Vec<String> {
        let mut removed: Vec<String> = self
            .entities
            .keys()
            .filter(|k| !seen.contains(k.as_str()))
            .cloned()
            .collect();
        removed.sort();
        for key in &removed {
            self.entities.remove(key);
            log::debug!("Entity '{}' lost, state discarded", key);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }
}
