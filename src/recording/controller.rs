use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::capture::{Frame, FrameHook, FrameSource};
use crate::encoding::{Artifact, Encoder, EncoderBackend};
use crate::error::{CaptureError, CaptureResult, EncodeFailure};

use super::{FrameSampler, RecordingSession, RecordingSettings, RecordingState, SessionReport};

/// Owns the recording lifecycle: `Idle -> Recording -> Finalizing -> Idle`.
///
/// `start` registers a [`FrameSampler`] on the source's frame hook and spawns
/// an encoder worker fed through a bounded queue. `stop` closes the sampler
/// at once and hands back a [`PendingArtifact`] that resolves when the worker
/// has drained the queue and finalized the encoder.
pub struct RecordingController {
    source: Arc<dyn FrameSource>,
    backend: Arc<dyn EncoderBackend>,
    settings: RecordingSettings,
    shared: Arc<Mutex<Shared>>,
}

struct Shared {
    state: RecordingState,
    active: Option<ActiveSession>,
    /// Completion handle of a session that ended before anyone called `stop`.
    unclaimed: Option<PendingArtifact>,
    last_report: Option<SessionReport>,
}

struct ActiveSession {
    session: RecordingSession,
    sampler: Arc<FrameSampler>,
    pending: Option<PendingArtifact>,
}

impl RecordingController {
    pub fn new(
        source: Arc<dyn FrameSource>,
        backend: Arc<dyn EncoderBackend>,
        settings: RecordingSettings,
    ) -> Self {
        Self {
            source,
            backend,
            settings,
            shared: Arc::new(Mutex::new(Shared {
                state: RecordingState::Idle,
                active: None,
                unclaimed: None,
                last_report: None,
            })),
        }
    }

    pub fn state(&self) -> RecordingState {
        lock(&self.shared).state
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecordingState::Recording
    }

    /// Seconds on the current session's timer, or 0 when no session is open.
    pub fn elapsed_secs(&self) -> u64 {
        lock(&self.shared)
            .active
            .as_ref()
            .map(|active| active.session.elapsed_secs())
            .unwrap_or(0)
    }

    /// Report of the most recently completed session.
    pub fn last_report(&self) -> Option<SessionReport> {
        lock(&self.shared).last_report.clone()
    }

    pub fn start(&self) -> CaptureResult<()> {
        let mut shared = lock(&self.shared);
        if shared.state != RecordingState::Idle {
            tracing::info!(state = ?shared.state, "start ignored, a session is already active");
            return Err(CaptureError::AlreadyActive);
        }
        if !self.source.is_available() {
            return Err(CaptureError::SourceUnavailable(format!(
                "output size is {}",
                self.source.output_size()
            )));
        }

        let encoder_config = self.settings.encoder_config();
        let encoder = self
            .backend
            .initialize(&encoder_config)
            .map_err(|err| match err {
                CaptureError::EncoderUnavailable(_) => err,
                other => CaptureError::EncoderUnavailable(other.to_string()),
            })?;

        let (frame_tx, frame_rx) = sync_channel(self.settings.queue_capacity.max(1));
        let sampler = Arc::new(FrameSampler::new(self.settings.fps, frame_tx));
        let session = RecordingSession::open(self.settings.fps);
        let session_id = session.id();
        let (done_tx, done_rx) = oneshot::channel();

        let worker = Worker {
            shared: Arc::clone(&self.shared),
            hook: self.source.frame_hook().clone(),
            sampler: Arc::clone(&sampler),
            session_id,
            done: done_tx,
        };
        thread::Builder::new()
            .name("embercap-encoder".to_string())
            .spawn(move || worker.run(encoder, frame_rx))
            .map_err(|e| CaptureError::EncoderUnavailable(e.to_string()))?;

        shared.state = RecordingState::Recording;
        if let Some(old) = shared.unclaimed.take() {
            tracing::warn!(
                session = %old.session_id(),
                "discarding uncollected result of previous session"
            );
        }
        shared.active = Some(ActiveSession {
            session,
            sampler: Arc::clone(&sampler),
            pending: Some(PendingArtifact {
                session_id,
                rx: done_rx,
            }),
        });
        self.source.frame_hook().register(sampler);

        tracing::info!(
            session = %session_id,
            fps = self.settings.fps,
            container = self.settings.container.display_name(),
            file = %encoder_config.filename(),
            "recording started"
        );
        Ok(())
    }

    /// Ends the current session.
    ///
    /// While recording, no frame is accepted after this returns. Returns the
    /// completion handle for the session if the caller has not taken it yet;
    /// `None` means there was nothing to stop.
    pub fn stop(&self) -> Option<PendingArtifact> {
        let mut guard = lock(&self.shared);
        let shared = &mut *guard;
        match shared.state {
            RecordingState::Recording => {
                let active = shared.active.as_mut()?;
                active.sampler.close();
                self.source.frame_hook().deregister();
                active.session.stop_timer();
                shared.state = RecordingState::Finalizing;

                tracing::info!(
                    session = %active.session.id(),
                    elapsed = active.session.elapsed_secs(),
                    "recording stopped, finalizing"
                );
                active.pending.take()
            }
            RecordingState::Finalizing => shared.active.as_mut().and_then(|a| a.pending.take()),
            RecordingState::Idle => shared.unclaimed.take(),
        }
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        let shared = lock(&self.shared);
        if shared.state == RecordingState::Recording {
            if let Some(active) = shared.active.as_ref() {
                active.sampler.close();
            }
            self.source.frame_hook().deregister();
        }
    }
}

/// Resolves to the artifact of a stopped session, or to the reason it failed.
#[derive(Debug)]
pub struct PendingArtifact {
    session_id: Uuid,
    rx: oneshot::Receiver<CaptureResult<Artifact>>,
}

impl PendingArtifact {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Blocks until the encoder worker is done. Must not be called from
    /// inside an async context.
    pub fn wait(self) -> CaptureResult<Artifact> {
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(CaptureError::codec("encoder worker exited without a result")))
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Consumer side of the ingestion queue for one session.
struct Worker {
    shared: Arc<Mutex<Shared>>,
    hook: FrameHook,
    sampler: Arc<FrameSampler>,
    session_id: Uuid,
    done: oneshot::Sender<CaptureResult<Artifact>>,
}

impl Worker {
    fn run(self, encoder: Box<dyn Encoder>, frames: Receiver<Frame>) {
        let mut encoded = 0;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.encode(encoder, frames, &mut encoded)
        }))
        .unwrap_or_else(|_| Err(CaptureError::codec("encoder panicked")));
        self.complete(result, encoded);
    }

    fn encode(
        &self,
        mut encoder: Box<dyn Encoder>,
        frames: Receiver<Frame>,
        encoded: &mut u64,
    ) -> CaptureResult<Artifact> {
        // Ends once the sampler is closed and the queue is drained.
        for frame in frames.iter() {
            tracing::trace!(
                session = %self.session_id,
                sequence = frame.sequence(),
                at = ?frame.captured_at(),
                "ingesting frame"
            );
            if let Err(err) = encoder.ingest(frame) {
                tracing::error!(session = %self.session_id, error = %err, "ingest failed, aborting session");
                self.abort();
                return Err(EncodeFailure::Ingest(err.to_string()).into());
            }
            *encoded = encoder.frames_ingested();
        }

        if encoder.frames_ingested() == 0 {
            return Err(EncodeFailure::Empty.into());
        }
        encoder.finalize()
    }

    /// Forces `Recording -> Finalizing` after a fatal ingest error.
    fn abort(&self) {
        let mut guard = lock(&self.shared);
        let shared = &mut *guard;
        if shared.state != RecordingState::Recording {
            return;
        }
        if let Some(active) = shared.active.as_mut() {
            if active.session.id() == self.session_id {
                self.sampler.close();
                self.hook.deregister();
                active.session.stop_timer();
                shared.state = RecordingState::Finalizing;
            }
        }
    }

    fn complete(self, result: CaptureResult<Artifact>, encoded: u64) {
        {
            let mut guard = lock(&self.shared);
            let shared = &mut *guard;
            if shared.state == RecordingState::Recording && self.sampler.close() {
                self.hook.deregister();
            }
            match shared.active.take() {
                Some(mut active) if active.session.id() == self.session_id => {
                    active.session.stop_timer();
                    let report = active.session.report(encoded, self.sampler.stats());
                    match &result {
                        Ok(artifact) => tracing::info!(
                            session = %self.session_id,
                            bytes = artifact.size(),
                            encoded = report.frames_encoded,
                            skipped = report.frames_skipped,
                            dropped = report.frames_dropped,
                            "recording finalized"
                        ),
                        Err(err) if err.is_empty_artifact() => tracing::warn!(
                            session = %self.session_id,
                            rendered = report.frames_rendered,
                            lost = report.drop_count(),
                            "recording captured no frames"
                        ),
                        Err(err) => tracing::warn!(
                            session = %self.session_id,
                            error = %err,
                            dropped = report.frames_dropped,
                            "recording failed"
                        ),
                    }
                    shared.last_report = Some(report);
                    shared.unclaimed = active.pending.take();
                    shared.state = RecordingState::Idle;
                }
                other => shared.active = other,
            }
        }

        if self.done.send(result).is_err() {
            tracing::debug!(session = %self.session_id, "artifact receiver dropped");
        }
    }
}
