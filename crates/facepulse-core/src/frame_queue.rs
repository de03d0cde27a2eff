//! Latest-wins frame hand-off between the capture thread and the fusion loop
//!
//! The queue never blocks the producer: when it is full the oldest frame is
//! evicted. The consumer polls without blocking.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::collaborators::{Frame, FrameSource};

#[derive(Debug, Default)]
pub struct QueueMetrics {
    pub frames_pushed: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_taken: AtomicU64,
}

impl QueueMetrics {
    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            frames_pushed: self.frames_pushed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_taken: self.frames_taken.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMetricsSnapshot {
    pub frames_pushed: u64,
    pub frames_dropped: u64,
    pub frames_taken: u64,
}

/// Bounded single-consumer frame queue with drop-oldest overflow.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct LatestFrameQueue {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    metrics: Arc<QueueMetrics>,
}

impl LatestFrameQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            metrics: Arc::new(QueueMetrics::default()),
        }
    }

    /// Enqueue `frame`, evicting the oldest buffered frames until it fits
    pub fn push(&self, frame: Frame) {
        let mut frame = frame;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => {
                    self.metrics.frames_pushed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(TrySendError::Full(rejected)) => {
                    frame = rejected;
                    if let Ok(old) = self.rx.try_recv() {
                        self.metrics.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        log::trace!("Frame {} dropped, queue full", old.frame_id);
                    }
                }
                // Both ends are owned by self, so the channel cannot disconnect
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Oldest buffered frame, or `None` when nothing is ready
    pub fn poll(&self) -> Option<Frame> {
        match self.rx.try_recv() {
            Ok(frame) => {
                self.metrics.frames_taken.fetch_add(1, Ordering::Relaxed);
                Some(frame)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.rx.capacity().unwrap_or(0)
    }

    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Background thread pulling frames from a `FrameSource` into a queue
pub struct CaptureThread {
    running: Arc<AtomicBool>,
    exhausted: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CaptureThread {
    /// Start capturing. `fps` paces the source; non-positive values disable pacing.
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        queue: LatestFrameQueue,
        fps: f64,
    ) -> Result<Self, std::io::Error> {
        let running = Arc::new(AtomicBool::new(true));
        let exhausted = Arc::new(AtomicBool::new(false));
        let period = if fps > 0.0 {
            Some(Duration::from_secs_f64(1.0 / fps))
        } else {
            None
        };

        let thread_running = Arc::clone(&running);
        let thread_exhausted = Arc::clone(&exhausted);
        let handle = thread::Builder::new()
            .name("facepulse-capture".to_string())
            .spawn(move || {
                log::info!("Capture thread started");
                while thread_running.load(Ordering::Acquire) {
                    let started = Instant::now();
                    match source.next_frame() {
                        Some(frame) => queue.push(frame),
                        None => {
                            log::info!("Frame source exhausted");
                            thread_exhausted.store(true, Ordering::Release);
                            break;
                        }
                    }
                    if let Some(period) = period {
                        if let Some(rest) = period.checked_sub(started.elapsed()) {
                            thread::sleep(rest);
                        }
                    }
                }
                source.close();
                log::info!("Capture thread stopped");
            })?;

        Ok(Self {
            running,
            exhausted,
            handle: Some(handle),
        })
    }

    /// True once the source returned `None`
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    /// Signal the thread to stop and wait for it; closes the source
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.stop();
    }
}
