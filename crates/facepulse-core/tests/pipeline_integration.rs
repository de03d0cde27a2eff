mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use facepulse_core::{
    Age, AggregatedFramePayload, CalibrationState, Classification, CollaboratorError,
    Collaborators, Detection, ExpressionClassifier, Frame, FusionPipeline, Image,
    WorkerMetricsSnapshot,
};

fn p1_detection(frame: &Frame) -> Detection {
    Detection::from_frame("p1", p1_box(), 0.92, &frame.image)
}

#[test]
fn test_single_face_calibration_scenario() {
    let identity = Arc::new(FailingIdentity {
        calls: AtomicUsize::new(0),
    });
    let mut pipeline = pipeline_with(test_config(30), identity.clone());

    for frame_id in 0..30u64 {
        let frame = green_frame(frame_id, 150, 15.0);
        let payload = pipeline.tick(&frame, vec![p1_detection(&frame)]);
        assert_eq!(payload.frame_id, frame_id);

        let face = &payload.faces["p1"];
        assert_eq!(face.bbox, p1_box());
        assert_eq!(face.tracking_confidence, 0.92);

        // Identity always fails: defaults from the first frame onward
        assert_eq!(face.biometrics.identity, "Guest");
        assert_eq!(face.biometrics.gender, "Unknown");
        assert_eq!(face.biometrics.age, Age::Label("Unknown".to_string()));

        assert_eq!(face.expression.dominant_emotion, "Happy");

        if frame_id < 29 {
            assert_eq!(face.rppg.calibration_state, CalibrationState::Calibrating);
            assert_eq!(face.rppg.quality_score, 0.0);
        } else {
            // The 30th sample fills the buffer
            assert_eq!(face.rppg.calibration_state, CalibrationState::Active);
            assert!(face.rppg.bpm.is_finite());
            assert!((0.0..=1.0).contains(&face.rppg.quality_score));
        }
    }

    // Defaults count as a refresh at frame 0, so no retry within the interval
    assert_eq!(identity.calls.load(Ordering::SeqCst), 1);
    let store = pipeline.store();
    let agg = store.get("p1").unwrap();
    assert_eq!(agg.biometrics.as_ref().map(|b| b.last_refresh_frame), Some(0));
    assert_eq!(agg.rppg.buffer_len(), 30);
}

#[test]
fn test_pulsing_face_reports_heart_rate() {
    let mut pipeline = pipeline_with(test_config(150), Arc::new(NamedIdentity("bob")));
    let fps = 15.0;
    let pulse_hz = 1.2;

    let mut last = None;
    for frame_id in 0..150u64 {
        let t = frame_id as f64 / fps;
        let green = (150.0 + 20.0 * (2.0 * std::f64::consts::PI * pulse_hz * t).sin()).round();
        let frame = green_frame(frame_id, green as u8, fps);
        last = Some(pipeline.tick(&frame, vec![p1_detection(&frame)]));
    }

    let payload = last.unwrap();
    let face = &payload.faces["p1"];
    assert_eq!(face.biometrics.identity, "bob");
    assert_eq!(face.biometrics.age, Age::Years(41.0));
    assert_eq!(face.rppg.calibration_state, CalibrationState::Active);
    assert!((face.rppg.bpm - 72.0).abs() <= 5.0, "bpm {}", face.rppg.bpm);
    assert!(face.rppg.quality_score > 0.0);
    assert_eq!(face.rppg.waveform.len(), 60);
    assert!(face.rppg.waveform.iter().all(|v| (-3.0..=3.0).contains(v)));
}

#[test]
fn test_reappearing_face_starts_cold() {
    let mut pipeline = pipeline_with(test_config(30), Arc::new(NamedIdentity("carol")));

    for frame_id in 0..30u64 {
        let frame = green_frame(frame_id, 150, 15.0);
        pipeline.tick(&frame, vec![p1_detection(&frame)]);
    }
    assert_eq!(pipeline.store().get("p1").map(|a| a.rppg.buffer_len()), Some(30));

    // One frame without p1 discards everything about it
    let empty = green_frame(30, 150, 15.0);
    let payload = pipeline.tick(&empty, Vec::new());
    assert!(payload.faces.is_empty());
    assert!(pipeline.store().is_empty());

    let frame = green_frame(31, 150, 15.0);
    let payload = pipeline.tick(&frame, vec![p1_detection(&frame)]);
    let face = &payload.faces["p1"];
    assert_eq!(face.rppg.calibration_state, CalibrationState::Calibrating);
    assert_eq!(face.rppg.bpm, 0.0);
    assert_eq!(pipeline.store().get("p1").map(|a| a.rppg.buffer_len()), Some(1));
    assert_eq!(pipeline.store().get("p1").map(|a| a.first_seen_frame), Some(31));
}

#[test]
fn test_payload_serializes_to_json() {
    let mut pipeline = pipeline_with(test_config(30), Arc::new(NamedIdentity("dave")));
    let frame = green_frame(0, 150, 15.0);
    let payload = pipeline.tick(&frame, vec![p1_detection(&frame)]);

    let value: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
    let face = &value["faces"]["p1"];
    assert_eq!(face["biometrics"]["identity"], "dave");
    assert_eq!(face["biometrics"]["age"], 41.0);
    assert_eq!(face["rppg"]["calibration_state"], "CALIBRATING");
    assert_eq!(face["expression"]["dominant_emotion"], "Happy");
}

/// Never answers, like a model wedged inside a driver call
struct StalledClassifier;

impl ExpressionClassifier for StalledClassifier {
    fn classify(&self, _region: &Image) -> Result<Classification, CollaboratorError> {
        thread::sleep(Duration::from_secs(3600));
        Err(CollaboratorError::failed("woke up"))
    }
}

enum Progress {
    Tick(AggregatedFramePayload),
    Finished(WorkerMetricsSnapshot),
}

#[test]
fn test_stalled_classifier_does_not_stall_ticks() {
    let mut config = test_config(30);
    config.runtime.worker_threads = 1;
    config.runtime.call_timeout_ms = 5;

    let (progress_tx, progress_rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        let mut pipeline = FusionPipeline::new(
            config,
            Collaborators {
                classifier: Arc::new(StalledClassifier),
                identity: Arc::new(NamedIdentity("erin")),
                demographics: Arc::new(FixedDemographics),
            },
        )
        .unwrap();
        for frame_id in 0..200u64 {
            let frame = green_frame(frame_id, 150, 15.0);
            let payload = pipeline.tick(&frame, vec![p1_detection(&frame)]);
            let _ = progress_tx.send(Progress::Tick(payload));
        }
        let metrics = pipeline.worker_metrics();
        // Dropping must not wait on the wedged worker
        drop(pipeline);
        let _ = progress_tx.send(Progress::Finished(metrics));
    });

    let mut last: Option<AggregatedFramePayload> = None;
    let metrics = loop {
        match progress_rx.recv_timeout(Duration::from_secs(10)) {
            Ok(Progress::Tick(payload)) => last = Some(payload),
            Ok(Progress::Finished(metrics)) => break metrics,
            Err(_) => panic!(
                "tick stalled after frame {:?}",
                last.as_ref().map(|p| p.frame_id)
            ),
        }
    };

    let payload = last.unwrap();
    assert_eq!(payload.frame_id, 199);
    let face = &payload.faces["p1"];
    assert_eq!(face.expression.dominant_emotion, "Neutral");
    // Refresh jobs queued behind the wedged worker never answer in time
    assert_eq!(face.biometrics.identity, "Guest");
    assert_eq!(face.rppg.calibration_state, CalibrationState::Active);
    assert!(metrics.jobs_rejected > 0);
}
