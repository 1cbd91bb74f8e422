use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::SamplerStats;

const TICK: Duration = Duration::from_secs(1);

/// One recording attempt, from `start()` until its artifact or error is
/// delivered.
pub struct RecordingSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    target_fps: u32,
    elapsed_secs: Arc<AtomicU64>,
    ticker: Option<Sender<()>>,
}

impl RecordingSession {
    /// Opens a session with the timer at zero and starts ticking it once per
    /// second.
    pub fn open(target_fps: u32) -> Self {
        let elapsed_secs = Arc::new(AtomicU64::new(0));
        let ticker = spawn_ticker(Arc::clone(&elapsed_secs));
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            target_fps,
            elapsed_secs,
            ticker,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs.load(Ordering::Relaxed)
    }

    pub fn stop_timer(&mut self) {
        // Dropping the sender disconnects the ticker, which then exits.
        self.ticker = None;
    }

    pub fn report(&self, frames_encoded: u64, sampler: SamplerStats) -> SessionReport {
        SessionReport {
            id: self.id,
            started_at: self.started_at,
            target_fps: self.target_fps,
            elapsed_secs: self.elapsed_secs(),
            frames_rendered: sampler.rendered,
            frames_encoded,
            frames_skipped: sampler.skipped,
            frames_dropped: sampler.dropped,
        }
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

fn spawn_ticker(elapsed_secs: Arc<AtomicU64>) -> Option<Sender<()>> {
    let (tx, rx) = channel::<()>();
    let spawned = thread::Builder::new()
        .name("embercap-timer".to_string())
        .spawn(move || loop {
            match rx.recv_timeout(TICK) {
                Err(RecvTimeoutError::Timeout) => {
                    elapsed_secs.fetch_add(1, Ordering::Relaxed);
                }
                _ => break,
            }
        });
    match spawned {
        Ok(_) => Some(tx),
        Err(err) => {
            // The timer is display-only; recording works without it.
            tracing::warn!(error = %err, "failed to start session timer");
            None
        }
    }
}

/// Metadata attached to a finished session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub target_fps: u32,
    pub elapsed_secs: u64,
    pub frames_rendered: u64,
    pub frames_encoded: u64,
    pub frames_skipped: u64,
    pub frames_dropped: u64,
}

impl SessionReport {
    /// Frames that never reached the encoder, for any reason.
    pub fn drop_count(&self) -> u64 {
        self.frames_skipped + self.frames_dropped
    }
}

/// `MM:SS` display of an elapsed-seconds timer.
pub fn format_timer(elapsed_secs: u64) -> String {
    format!("{:02}:{:02}", elapsed_secs / 60, elapsed_secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timer() {
        assert_eq!(format_timer(0), "00:00");
        assert_eq!(format_timer(75), "01:15");
        assert_eq!(format_timer(3600), "60:00");
    }

    #[test]
    fn test_new_session_starts_at_zero() {
        let mut session = RecordingSession::open(24);
        assert_eq!(session.elapsed_secs(), 0);
        session.stop_timer();

        let report = session.report(
            48,
            SamplerStats {
                rendered: 120,
                forwarded: 48,
                skipped: 72,
                dropped: 0,
            },
        );
        assert_eq!(report.id, session.id());
        assert_eq!(report.target_fps, 24);
        assert_eq!(report.frames_encoded, 48);
        assert_eq!(report.drop_count(), 72);
    }

    #[test]
    fn test_report_serializes_to_json() {
        let session = RecordingSession::open(24);
        let report = session.report(1, SamplerStats::default());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["target_fps"], 24);
        assert_eq!(json["frames_encoded"], 1);
    }
}
