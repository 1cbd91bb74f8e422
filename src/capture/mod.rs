mod frame;
mod still;

pub use frame::{Frame, PixelFormat};
pub use still::{CaptureRequest, StillCapture};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Anything that can hand out the contents of its drawable surface.
///
/// The pipeline only ever samples a source; it never drives rendering.
pub trait FrameSource: Send + Sync {
    /// Copy of the most recently drawn surface contents.
    fn current_frame(&self) -> Result<RgbaImage>;

    fn output_size(&self) -> Resolution;

    /// Notification point invoked once per rendered frame.
    fn frame_hook(&self) -> &FrameHook;

    fn is_available(&self) -> bool {
        let size = self.output_size();
        size.width > 0 && size.height > 0
    }
}

/// A source whose output resolution can be changed and which can render on
/// demand, outside of its normal continuous loop. Needed by [`StillCapture`].
pub trait RenderSurface: FrameSource {
    fn display_scale(&self) -> f32;

    fn set_output_resolution(&self, size: Resolution, scale: f32) -> Result<()>;

    fn render_now(&self) -> Result<()>;

    /// Held by whoever is currently overriding the output resolution.
    fn capture_lock(&self) -> &CaptureLock;
}

/// Receives per-frame notifications from a [`FrameHook`].
pub trait FrameObserver: Send + Sync {
    /// Called on the render thread right after a frame was drawn.
    /// `frame_time` is the renderer clock at that frame.
    fn on_frame(&self, frame_time: Duration, source: &dyn FrameSource);
}

/// Per-frame callback slot owned by a renderer.
///
/// The renderer calls [`FrameHook::notify`] after each draw; the recording
/// pipeline registers its sampler here for the duration of a session.
#[derive(Clone, Default)]
pub struct FrameHook {
    observer: Arc<Mutex<Option<Arc<dyn FrameObserver>>>>,
}

impl FrameHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn FrameObserver>) {
        let mut slot = self.observer.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(observer);
    }

    pub fn deregister(&self) {
        let mut slot = self.observer.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    pub fn is_registered(&self) -> bool {
        self.observer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn notify(&self, frame_time: Duration, source: &dyn FrameSource) {
        // Release the slot before calling out so a concurrent deregister
        // never waits on the observer.
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(observer) = observer {
            observer.on_frame(frame_time, source);
        }
    }
}

impl fmt::Debug for FrameHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHook")
            .field("registered", &self.is_registered())
            .finish()
    }
}

/// Exclusive claim on a surface's output resolution.
///
/// Lives next to the surface it protects, so every [`StillCapture`] pointed
/// at the same surface contends for the same lock.
#[derive(Debug, Default)]
pub struct CaptureLock {
    held: AtomicBool,
}

impl CaptureLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` while another claim is alive.
    pub fn try_acquire(&self) -> Option<CaptureClaim<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CaptureClaim { lock: self })
    }
}

/// Releases its [`CaptureLock`] on drop, including during unwinding.
#[derive(Debug)]
pub struct CaptureClaim<'a> {
    lock: &'a CaptureLock,
}

impl Drop for CaptureClaim<'_> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const UHD_4K: Resolution = Resolution::new(3840, 2160);
    pub const UHD_8K: Resolution = Resolution::new(7680, 4320);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
