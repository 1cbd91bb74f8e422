use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::capture::{Frame, FrameObserver, FrameSource, Resolution};

/// Frames arriving this close before their slot still count as on time.
/// Absorbs rounding when render and target rates do not divide evenly.
const RATE_SLACK: Duration = Duration::from_micros(500);

/// Decides, once per rendered frame, whether that frame goes to the encoder.
///
/// Runs on the render thread and never blocks it: rate-limited frames are
/// skipped, and frames that find the ingestion queue full are dropped. Both
/// are counted. A session keeps the size of its first forwarded frame; frames
/// of any other size, such as one drawn during a still capture, are skipped. Once [`close`](FrameSampler::close) returns, nothing else
/// reaches the queue.
pub struct FrameSampler {
    gate: Mutex<Gate>,
    rendered: AtomicU64,
    forwarded: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
}

struct Gate {
    sender: Option<SyncSender<Frame>>,
    interval: Duration,
    next_due: Option<Duration>,
    next_sequence: u64,
    frame_size: Option<Resolution>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SamplerStats {
    /// Frames the renderer reported while the sampler was open.
    pub rendered: u64,
    /// Frames handed to the ingestion queue.
    pub forwarded: u64,
    /// Frames skipped by rate limiting or for not matching the session size.
    pub skipped: u64,
    /// Frames lost to a full queue or a failed read of the surface.
    pub dropped: u64,
}

impl FrameSampler {
    pub fn new(fps: u32, sender: SyncSender<Frame>) -> Self {
        Self {
            gate: Mutex::new(Gate {
                sender: Some(sender),
                interval: Duration::from_secs(1) / fps.max(1),
                next_due: None,
                next_sequence: 0,
                frame_size: None,
            }),
            rendered: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Stops accepting frames. Returns `false` if already closed.
    ///
    /// Dropping the sender lets the encoder worker drain what is queued and
    /// then observe the end of the stream.
    pub fn close(&self) -> bool {
        let mut gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        gate.sender.take().is_some()
    }

    pub fn stats(&self) -> SamplerStats {
        SamplerStats {
            rendered: self.rendered.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn offer(&self, frame_time: Duration, source: &dyn FrameSource) {
        let mut gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        if gate.sender.is_none() {
            return;
        }
        self.rendered.fetch_add(1, Ordering::Relaxed);

        if let Some(due) = gate.next_due {
            if frame_time + RATE_SLACK < due {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        // Keep to the fixed schedule unless we fell a whole interval behind.
        gate.next_due = Some(match gate.next_due {
            Some(due) if frame_time < due + gate.interval => due + gate.interval,
            _ => frame_time + gate.interval,
        });

        let image = match source.current_frame() {
            Ok(image) => image,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read frame from source");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let size = Resolution::new(image.width(), image.height());
        match gate.frame_size {
            Some(expected) if expected != size => {
                tracing::debug!(%size, %expected, "frame size changed mid-session, skipping frame");
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Some(_) => {}
            None => gate.frame_size = Some(size),
        }

        let sequence = gate.next_sequence;
        gate.next_sequence += 1;
        let frame = Frame::new(sequence, frame_time, image);

        let result = match gate.sender.as_ref() {
            Some(sender) => sender.try_send(frame),
            None => return,
        };
        match result {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                tracing::debug!(sequence, "ingestion queue full, dropping frame");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                // The encoder worker is gone; nothing will read further frames.
                gate.sender = None;
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl FrameObserver for FrameSampler {
    fn on_frame(&self, frame_time: Duration, source: &dyn FrameSource) {
        self.offer(frame_time, source);
    }
}
