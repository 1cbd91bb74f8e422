//! Test doubles shared by unit tests across modules.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use image::{Rgba, RgbaImage};

use crate::capture::{CaptureLock, Frame, FrameHook, FrameSource, RenderSurface, Resolution};
use crate::encoding::{
    Artifact, ArtifactKind, Encoder, EncoderBackend, EncoderConfig, SequenceCheck,
};
use crate::error::{CaptureError, CaptureResult};

/// Renderer clock for frame `k` at a steady `fps`.
pub(crate) fn frame_time(k: u32, fps: u32) -> Duration {
    Duration::from_secs(1) / fps * k
}

/// In-memory [`RenderSurface`] with switchable failures.
pub(crate) struct StubSurface {
    hook: FrameHook,
    capture_lock: CaptureLock,
    state: Mutex<StubState>,
    fail_reads: AtomicBool,
    fail_renders: AtomicBool,
    panic_renders: AtomicBool,
    render_gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

struct StubState {
    size: Resolution,
    scale: f32,
    frame_cap: Option<Resolution>,
    rendered: Vec<Resolution>,
    resolution_log: Vec<Resolution>,
}

impl StubSurface {
    pub(crate) fn new(size: Resolution) -> Self {
        Self {
            hook: FrameHook::new(),
            capture_lock: CaptureLock::new(),
            state: Mutex::new(StubState {
                size,
                scale: 1.0,
                frame_cap: None,
                rendered: Vec::new(),
                resolution_log: Vec::new(),
            }),
            fail_reads: AtomicBool::new(false),
            fail_renders: AtomicBool::new(false),
            panic_renders: AtomicBool::new(false),
            render_gate: Mutex::new(None),
        }
    }

    /// Acts as the render loop: reports one drawn frame to the hook.
    pub(crate) fn emit(&self, frame_time: Duration) {
        self.hook.notify(frame_time, self);
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_renders(&self, fail: bool) {
        self.fail_renders.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn panic_renders(&self, panic: bool) {
        self.panic_renders.store(panic, Ordering::SeqCst);
    }

    pub(crate) fn set_scale(&self, scale: f32) {
        self.state.lock().unwrap().scale = scale;
    }

    /// Frames read back are never larger than `cap`, whatever the output size.
    pub(crate) fn cap_frames_at(&self, cap: Resolution) {
        self.state.lock().unwrap().frame_cap = Some(cap);
    }

    /// Sizes at which `render_now` ran.
    pub(crate) fn rendered_sizes(&self) -> Vec<Resolution> {
        self.state.lock().unwrap().rendered.clone()
    }

    /// Every size passed to `set_output_resolution`, in order.
    pub(crate) fn resolution_log(&self) -> Vec<Resolution> {
        self.state.lock().unwrap().resolution_log.clone()
    }

    /// Makes the next `render_now` signal on the returned receiver and then
    /// wait until something is sent on the returned sender.
    pub(crate) fn block_renders(&self) -> (Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = channel();
        let (release_tx, release_rx) = channel();
        *self.render_gate.lock().unwrap() = Some((started_tx, release_rx));
        (started_rx, release_tx)
    }
}

impl FrameSource for StubSurface {
    fn current_frame(&self) -> Result<RgbaImage> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("surface lost");
        }
        let state = self.state.lock().unwrap();
        let (mut width, mut height) = (state.size.width, state.size.height);
        if let Some(cap) = state.frame_cap {
            width = width.min(cap.width);
            height = height.min(cap.height);
        }
        Ok(RgbaImage::from_pixel(width, height, Rgba([255, 80, 0, 255])))
    }

    fn output_size(&self) -> Resolution {
        self.state.lock().unwrap().size
    }

    fn frame_hook(&self) -> &FrameHook {
        &self.hook
    }
}

impl RenderSurface for StubSurface {
    fn display_scale(&self) -> f32 {
        self.state.lock().unwrap().scale
    }

    fn set_output_resolution(&self, size: Resolution, scale: f32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.size = size;
        state.scale = scale;
        state.resolution_log.push(size);
        Ok(())
    }

    fn render_now(&self) -> Result<()> {
        let gate = self.render_gate.lock().unwrap().take();
        if let Some((started, release)) = gate {
            started.send(()).unwrap();
            release.recv().unwrap();
        }
        if self.panic_renders.load(Ordering::SeqCst) {
            panic!("render pass blew up");
        }
        if self.fail_renders.load(Ordering::SeqCst) {
            bail!("device lost");
        }
        let mut state = self.state.lock().unwrap();
        let size = state.size;
        state.rendered.push(size);
        Ok(())
    }

    fn capture_lock(&self) -> &CaptureLock {
        &self.capture_lock
    }
}

/// Lets a test hold a [`ScriptedBackend`] encoder inside `ingest`.
#[derive(Clone, Default)]
pub(crate) struct Release(Arc<(Mutex<bool>, Condvar)>);

impl Release {
    fn hold(&self) {
        *self.0 .0.lock().unwrap() = true;
    }

    pub(crate) fn release(&self) {
        let (held, cvar) = &*self.0;
        *held.lock().unwrap() = false;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (held, cvar) = &*self.0;
        let mut guard = held.lock().unwrap();
        while *guard {
            guard = cvar.wait(guard).unwrap();
        }
    }
}

/// Backend whose encoders record the sequence numbers they receive.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    seen: Arc<Mutex<Vec<u64>>>,
    fail_init: bool,
    fail_at: Option<usize>,
    first_session_only: bool,
    sessions: AtomicUsize,
    release: Release,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// The `index`-th ingested frame (0-based) is rejected.
    pub(crate) fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Only the first session's encoder follows `failing_at`.
    pub(crate) fn first_session_only(mut self) -> Self {
        self.first_session_only = true;
        self
    }

    /// Encoders block in `ingest` until [`Release::release`] is called.
    pub(crate) fn held(self) -> Self {
        self.release.hold();
        self
    }

    pub(crate) fn seen(&self) -> Arc<Mutex<Vec<u64>>> {
        Arc::clone(&self.seen)
    }

    pub(crate) fn release_handle(&self) -> Release {
        self.release.clone()
    }
}

impl EncoderBackend for ScriptedBackend {
    fn initialize(&self, config: &EncoderConfig) -> CaptureResult<Box<dyn Encoder>> {
        if self.fail_init {
            return Err(CaptureError::EncoderUnavailable("codec missing".into()));
        }
        let session = self.sessions.fetch_add(1, Ordering::SeqCst);
        let fail_at = if self.first_session_only && session > 0 {
            None
        } else {
            self.fail_at
        };
        Ok(Box::new(ScriptedEncoder {
            filename: config.filename(),
            seen: Arc::clone(&self.seen),
            fail_at,
            release: self.release.clone(),
            check: SequenceCheck::default(),
            count: 0,
        }))
    }
}

struct ScriptedEncoder {
    filename: String,
    seen: Arc<Mutex<Vec<u64>>>,
    fail_at: Option<usize>,
    release: Release,
    check: SequenceCheck,
    count: u64,
}

impl Encoder for ScriptedEncoder {
    fn ingest(&mut self, frame: Frame) -> CaptureResult<()> {
        self.release.wait();
        self.check.admit(frame.sequence())?;
        if self.fail_at == Some(self.count as usize) {
            return Err(CaptureError::IngestFailed("scripted failure".into()));
        }
        self.seen.lock().unwrap().push(frame.sequence());
        self.count += 1;
        Ok(())
    }

    fn frames_ingested(&self) -> u64 {
        self.count
    }

    fn finalize(self: Box<Self>) -> CaptureResult<Artifact> {
        Artifact::new(
            self.count.to_le_bytes().to_vec(),
            ArtifactKind::Video,
            "application/octet-stream",
            self.filename,
        )
    }
}
