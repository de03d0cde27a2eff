//! Orchestration loop: poll frame, fuse, publish

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::collaborators::{Detector, FrameSource, Publisher};
use crate::error::FusionError;
use crate::frame_queue::{CaptureThread, LatestFrameQueue};
use crate::payload::AggregatedFramePayload;
use crate::pipeline::FusionPipeline;

/// Cloneable flag that ends `FusionRunner::run` between ticks
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Totals for one `run`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_published: u64,
    pub idle_polls: u64,
}

pub struct FusionRunner {
    pipeline: FusionPipeline,
    detector: Arc<dyn Detector>,
    publisher: Box<dyn Publisher>,
    queue: LatestFrameQueue,
    capture: Option<CaptureThread>,
    stop: StopHandle,
    idle_poll: Duration,
}

impl FusionRunner {
    pub fn new(
        pipeline: FusionPipeline,
        detector: Arc<dyn Detector>,
        publisher: Box<dyn Publisher>,
    ) -> Self {
        let runtime = &pipeline.config().runtime;
        let queue = LatestFrameQueue::new(runtime.frame_queue_capacity);
        let idle_poll = Duration::from_millis(runtime.idle_poll_ms);
        Self {
            pipeline,
            detector,
            publisher,
            queue,
            capture: None,
            stop: StopHandle::default(),
            idle_poll,
        }
    }

    /// Queue handle for pushing frames without a capture thread
    pub fn queue(&self) -> &LatestFrameQueue {
        &self.queue
    }

    pub fn pipeline(&self) -> &FusionPipeline {
        &self.pipeline
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Start pulling frames from `source` on a background thread
    pub fn start_capture(&mut self, source: Box<dyn FrameSource>) -> Result<(), FusionError> {
        if let Some(mut previous) = self.capture.take() {
            previous.stop();
        }
        let fps = self.pipeline.config().runtime.capture_fps;
        self.capture = Some(CaptureThread::spawn(source, self.queue.clone(), fps)?);
        Ok(())
    }

    /// One poll. Publishes and returns the payload, or `None` if no frame was ready.
    pub fn step(&mut self) -> Option<AggregatedFramePayload> {
        let frame = self.queue.poll()?;
        let payload = self.pipeline.process_frame(&frame, &self.detector);
        self.publisher.publish(&payload);
        Some(payload)
    }

    /// Loop until stopped, or until the capture source is exhausted and drained
    pub fn run(&mut self) -> RunSummary {
        log::info!("Fusion runner started");
        let mut summary = RunSummary::default();

        while !self.stop.is_stopped() {
            if self.step().is_some() {
                summary.frames_published += 1;
                continue;
            }
            let exhausted = self
                .capture
                .as_ref()
                .map(|c| c.is_exhausted())
                .unwrap_or(false);
            if exhausted && self.queue.is_empty() {
                break;
            }
            summary.idle_polls += 1;
            thread::sleep(self.idle_poll);
        }

        self.stop_capture();
        let queue = self.queue.metrics();
        log::info!(
            "Fusion runner stopped: {} frames published, {} dropped by the queue",
            summary.frames_published,
            queue.frames_dropped
        );
        summary
    }

    /// Stop the capture thread, closing its source
    pub fn stop_capture(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
    }
}

impl Drop for FusionRunner {
    fn drop(&mut self) {
        self.stop_capture();
    }
}
