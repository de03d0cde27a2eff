//! One fusion tick: detections in, aggregated payload out
//!
//! Collaborator calls for all faces of a tick are dispatched to the worker
//! pool together and awaited against one shared deadline before any entity
//! state is touched. Results are then folded into the store on the calling
//! thread, one face at a time.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::collaborators::{
    BoundingBox, Classification, Demographics, DemographicsService, Detection, Detector,
    ExpressionClassifier, Frame, IdentityService,
};
use crate::config::FusionConfig;
use crate::entity::{EntityAggregate, EntityStateStore};
use crate::error::{CollaboratorError, FusionError};
use crate::payload::{
    AggregatedFramePayload, BiometricsPayload, ExpressionPayload, FacePayload, RppgPayload,
};
use crate::smoother::{arg_max, Smoother};
use crate::throttle::{Biometrics, RefreshedBiometrics, ThrottledRefreshPolicy};
use crate::worker::{Pending, WorkerMetricsSnapshot, WorkerPool};

/// Perception models the pipeline consults per face
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn ExpressionClassifier>,
    pub identity: Arc<dyn IdentityService>,
    pub demographics: Arc<dyn DemographicsService>,
}

/// In-flight collaborator calls for one detection
struct FaceJobs {
    classify: Result<Pending<Classification>, CollaboratorError>,
    refresh: Option<RefreshJobs>,
}

struct RefreshJobs {
    identity: Result<Pending<String>, CollaboratorError>,
    demographics: Result<Pending<Demographics>, CollaboratorError>,
}

/// Collaborator results for one detection, ready to apply
struct FaceResults {
    classification: Result<Classification, CollaboratorError>,
    refresh: Option<Result<RefreshedBiometrics, CollaboratorError>>,
}

pub struct FusionPipeline {
    config: FusionConfig,
    store: EntityStateStore,
    policy: ThrottledRefreshPolicy,
    pool: WorkerPool,
    collaborators: Collaborators,
    call_timeout: Duration,
    fallback_distribution: BTreeMap<String, f64>,
}

impl FusionPipeline {
    pub fn new(config: FusionConfig, collaborators: Collaborators) -> Result<Self, FusionError> {
        config.validate()?;
        let store = EntityStateStore::new(&config)?;
        let pool = WorkerPool::start(config.runtime.worker_threads)?;
        Ok(Self {
            policy: ThrottledRefreshPolicy::new(config.biometrics.refresh_interval),
            call_timeout: Duration::from_millis(config.runtime.call_timeout_ms),
            fallback_distribution: config.expression.fallback_distribution(),
            store,
            pool,
            collaborators,
            config,
        })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn store(&self) -> &EntityStateStore {
        &self.store
    }

    pub fn worker_metrics(&self) -> WorkerMetricsSnapshot {
        self.pool.metrics()
    }

    /// Run the detector on the worker pool, then `tick`.
    ///
    /// A failed detection publishes an empty payload and leaves every entity
    /// in place; the frame is treated as skipped.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        detector: &Arc<dyn Detector>,
    ) -> AggregatedFramePayload {
        let job_detector = Arc::clone(detector);
        let job_frame = frame.clone();
        let detected = self
            .pool
            .call(move || job_detector.detect(&job_frame), self.call_timeout);

        match detected {
            Ok(detections) => {
                let threshold = self.config.runtime.detector_confidence_threshold;
                let kept: Vec<Detection> = detections
                    .into_iter()
                    .filter(|d| d.detector_confidence >= threshold)
                    .collect();
                self.tick(frame, kept)
            }
            Err(err) => {
                log::warn!("Detection failed on frame {}: {}", frame.frame_id, err);
                AggregatedFramePayload::empty(frame.frame_id, frame.timestamp)
            }
        }
    }

    /// Fuse one detection set into entity state and build the frame payload.
    ///
    /// Entities missing from `detections` are discarded afterwards. When a
    /// key appears more than once, the first detection wins.
    pub fn tick(&mut self, frame: &Frame, detections: Vec<Detection>) -> AggregatedFramePayload {
        let detections = dedupe(detections);

        let jobs: Vec<FaceJobs> = detections
            .iter()
            .map(|d| self.dispatch(d, frame.frame_id))
            .collect();
        let deadline = Instant::now() + self.call_timeout;
        let results: Vec<FaceResults> = jobs
            .into_iter()
            .map(|j| Self::await_jobs(j, deadline))
            .collect();

        let mut payload = AggregatedFramePayload::empty(frame.frame_id, frame.timestamp);
        for (detection, results) in detections.iter().zip(results) {
            let face = self.apply(frame, detection, results);
            payload.faces.insert(detection.entity_key.clone(), face);
        }

        let seen: HashSet<String> = detections.iter().map(|d| d.entity_key.clone()).collect();
        let removed = self.store.retain_seen(&seen);
        if !removed.is_empty() {
            log::debug!(
                "Frame {}: discarded {} vanished entities",
                frame.frame_id,
                removed.len()
            );
        }

        payload
    }

    fn dispatch(&self, detection: &Detection, frame_id: u64) -> FaceJobs {
        let cached = self
            .store
            .get(&detection.entity_key)
            .and_then(|agg| agg.biometrics.as_ref());

        let classifier = Arc::clone(&self.collaborators.classifier);
        let region = Arc::clone(&detection.region);
        let classify = self
            .pool
            .submit(move || classifier.classify(&region))
            .map_err(CollaboratorError::from);

        let refresh = if self.policy.should_refresh(cached, frame_id) {
            let identity = Arc::clone(&self.collaborators.identity);
            let region = Arc::clone(&detection.region);
            let identity = self
                .pool
                .submit(move || identity.identify(&region))
                .map_err(CollaboratorError::from);

            let demographics = Arc::clone(&self.collaborators.demographics);
            let region = Arc::clone(&detection.region);
            let demographics = self
                .pool
                .submit(move || demographics.analyze(&region))
                .map_err(CollaboratorError::from);

            Some(RefreshJobs {
                identity,
                demographics,
            })
        } else {
            None
        };

        FaceJobs { classify, refresh }
    }

    fn await_jobs(jobs: FaceJobs, deadline: Instant) -> FaceResults {
        let classification = jobs.classify.and_then(|p| p.wait_until(deadline));
        let refresh = jobs.refresh.map(|r| {
            let identity = r.identity.and_then(|p| p.wait_until(deadline));
            let demographics = r.demographics.and_then(|p| p.wait_until(deadline));
            match (identity, demographics) {
                (Ok(identity), Ok(demo)) => Ok(RefreshedBiometrics {
                    identity,
                    gender: demo.gender,
                    age: demo.age,
                }),
                (Err(err), _) | (_, Err(err)) => Err(err),
            }
        });
        FaceResults {
            classification,
            refresh,
        }
    }

    fn apply(&mut self, frame: &Frame, detection: &Detection, results: FaceResults) -> FacePayload {
        let fallback = &self.fallback_distribution;
        let fallback_label = &self.config.expression.fallback_label;
        let biometrics_defaults = &self.config.biometrics;
        let waveform_window = self.config.rppg.waveform_window;
        let policy = &self.policy;

        let aggregate: &mut EntityAggregate =
            self.store.resolve(&detection.entity_key, frame.frame_id);

        let bbox = aggregate.box_smoother.smooth(&detection.bbox_raw.to_array());

        if let Some(outcome) = results.refresh {
            let cached = aggregate.biometrics.take();
            aggregate.biometrics =
                Some(policy.apply(cached, outcome, frame.frame_id, biometrics_defaults));
        }
        let biometrics = aggregate
            .biometrics
            .get_or_insert_with(|| Biometrics::defaults(biometrics_defaults, frame.frame_id));
        let biometrics = BiometricsPayload::from(&*biometrics);

        let expression = match results.classification {
            Ok(classification) => {
                let smoothed = aggregate
                    .emotion_smoother
                    .smooth(&classification.probabilities);
                let (dominant, confidence) = arg_max(&smoothed)
                    .map(|(label, p)| (label.to_string(), p))
                    .unwrap_or_else(|| (fallback_label.clone(), 0.0));
                ExpressionPayload::new(dominant, &smoothed, confidence)
            }
            Err(err) => {
                log::warn!(
                    "Expression classification failed for '{}': {}",
                    detection.entity_key,
                    err
                );
                let confidence = fallback.get(fallback_label).copied().unwrap_or(0.0);
                ExpressionPayload::new(fallback_label.clone(), fallback, confidence)
            }
        };

        let (bpm, quality) = aggregate.rppg.update(&detection.region, frame.timestamp);
        let state = aggregate.rppg.get_state();
        let rppg = RppgPayload {
            bpm,
            waveform: aggregate.rppg.get_waveform(waveform_window),
            quality_score: quality,
            calibration_state: state.state,
            progress: state.progress,
        };

        FacePayload {
            bbox: BoundingBox::from_array(bbox),
            biometrics,
            tracking_confidence: detection.detector_confidence,
            expression,
            rppg,
        }
    }
}

fn dedupe(detections: Vec<Detection>) -> Vec<Detection> {
    let mut seen = HashSet::new();
    detections
        .into_iter()
        .filter(|d| {
            let first = seen.insert(d.entity_key.clone());
            if !first {
                log::warn!("Duplicate detection for '{}' ignored", d.entity_key);
            }
            first
        })
        .collect()
}
