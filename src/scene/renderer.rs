use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use image::{Rgba, RgbaImage};

use crate::capture::{CaptureLock, FrameHook, FrameSource, RenderSurface, Resolution};
use crate::config::SceneConfig;

use super::{Blend, ParticleField, ParticleLayer, Point3};

const BACKGROUND: Rgba<u8> = Rgba([0x05, 0x05, 0x05, 0xFF]);
const CAMERA_DISTANCE: f32 = 15.0;
const FOV_DEGREES: f32 = 50.0;
const NEAR_PLANE: f32 = 0.1;
const EARTH_POINT_SIZE: f32 = 0.05;
const FIRE_POINT_SIZE: f32 = 0.08;
const MAX_SURFACE_DIMENSION: u32 = 16384;

/// Software point renderer for a [`ParticleField`].
///
/// Each [`advance`](ParticleRenderer::advance) draws one frame into the
/// back buffer and then reports it on the frame hook. `render_now` draws
/// without advancing the clock or reporting.
pub struct ParticleRenderer {
    field: ParticleField,
    hook: FrameHook,
    capture_lock: CaptureLock,
    state: Mutex<RenderState>,
}

struct RenderState {
    size: Resolution,
    scale: f32,
    clock: Duration,
    buffer: RgbaImage,
}

impl ParticleRenderer {
    pub fn new(field: ParticleField, size: Resolution) -> Result<Self> {
        check_size(size)?;
        tracing::debug!(
            %size,
            earth = field.earth().len(),
            fire = field.fire().len(),
            "particle renderer created"
        );
        Ok(Self {
            field,
            hook: FrameHook::new(),
            capture_lock: CaptureLock::new(),
            state: Mutex::new(RenderState {
                size,
                scale: 1.0,
                clock: Duration::ZERO,
                buffer: RgbaImage::from_pixel(size.width, size.height, BACKGROUND),
            }),
        })
    }

    pub fn from_config(config: &SceneConfig) -> Result<Self> {
        Self::new(
            ParticleField::new(config.earth_particles, config.fire_particles),
            Resolution::new(config.width, config.height),
        )
    }

    pub fn clock(&self) -> Duration {
        self.lock().clock
    }

    /// Moves the animation forward by `delta`, draws, and notifies the hook.
    pub fn advance(&self, delta: Duration) {
        let frame_time = {
            let mut state = self.lock();
            state.clock += delta;
            draw(&mut state, &self.field);
            state.clock
        };
        // The state lock must be released before observers read the frame.
        self.hook.notify(frame_time, self);
    }

    fn lock(&self) -> MutexGuard<'_, RenderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FrameSource for ParticleRenderer {
    fn current_frame(&self) -> Result<RgbaImage> {
        Ok(self.lock().buffer.clone())
    }

    fn output_size(&self) -> Resolution {
        self.lock().size
    }

    fn frame_hook(&self) -> &FrameHook {
        &self.hook
    }
}

impl RenderSurface for ParticleRenderer {
    fn display_scale(&self) -> f32 {
        self.lock().scale
    }

    fn set_output_resolution(&self, size: Resolution, scale: f32) -> Result<()> {
        check_size(size)?;
        if !scale.is_finite() || scale <= 0.0 {
            bail!("Invalid display scale {}", scale);
        }
        let mut state = self.lock();
        if state.size != size {
            state.buffer = RgbaImage::from_pixel(size.width, size.height, BACKGROUND);
        }
        state.size = size;
        state.scale = scale;
        tracing::debug!(%size, scale, "output resolution changed");
        Ok(())
    }

    fn render_now(&self) -> Result<()> {
        let mut state = self.lock();
        draw(&mut state, &self.field);
        Ok(())
    }

    fn capture_lock(&self) -> &CaptureLock {
        &self.capture_lock
    }
}

fn check_size(size: Resolution) -> Result<()> {
    if size.is_empty() {
        bail!("Surface size {} is empty", size);
    }
    if size.width > MAX_SURFACE_DIMENSION || size.height > MAX_SURFACE_DIMENSION {
        bail!(
            "Surface size {} exceeds the maximum of {} per side",
            size,
            MAX_SURFACE_DIMENSION
        );
    }
    Ok(())
}

/// Perspective camera on the +z axis looking at the origin.
struct Camera {
    half_width: f32,
    half_height: f32,
    focal: f32,
}

impl Camera {
    fn new(size: Resolution) -> Self {
        let half_height = size.height as f32 / 2.0;
        let half_fov = FOV_DEGREES.to_radians() / 2.0;
        Self {
            half_width: size.width as f32 / 2.0,
            half_height,
            focal: half_height / half_fov.tan(),
        }
    }

    /// Screen position and pixel diameter of a point of world size `size`.
    fn project(&self, p: Point3, size: f32) -> Option<(f32, f32, f32)> {
        let depth = CAMERA_DISTANCE - p.z;
        if depth < NEAR_PLANE {
            return None;
        }
        let k = self.focal / depth;
        Some((
            self.half_width + p.x * k,
            self.half_height - p.y * k,
            (size * k).max(1.0),
        ))
    }
}

fn draw(state: &mut RenderState, field: &ParticleField) {
    let t = state.clock.as_secs_f32();
    let camera = Camera::new(state.size);
    let buffer = &mut state.buffer;
    for pixel in buffer.pixels_mut() {
        *pixel = BACKGROUND;
    }

    let point_sizes = [EARTH_POINT_SIZE, FIRE_POINT_SIZE];
    for (layer, point_size) in field.layers().into_iter().zip(point_sizes) {
        draw_layer(buffer, &camera, layer, point_size, t);
    }
}

fn draw_layer(
    buffer: &mut RgbaImage,
    camera: &Camera,
    layer: &ParticleLayer,
    point_size: f32,
    t: f32,
) {
    if layer.is_empty() {
        return;
    }
    let (width, height) = (buffer.width() as i64, buffer.height() as i64);
    let opacity = layer.opacity();

    for (p, color) in layer.positions(t).zip(layer.colors()) {
        let Some((sx, sy, diameter)) = camera.project(p, point_size) else {
            continue;
        };
        let radius = diameter / 2.0;
        let x0 = ((sx - radius).floor() as i64).max(0);
        let x1 = ((sx + radius).ceil() as i64).min(width);
        let y0 = ((sy - radius).floor() as i64).max(0);
        let y1 = ((sy + radius).ceil() as i64).min(height);

        for y in y0..y1 {
            for x in x0..x1 {
                let dst = buffer.get_pixel_mut(x as u32, y as u32);
                blend(dst, *color, opacity, layer.blend());
            }
        }
    }
}

fn blend(dst: &mut Rgba<u8>, src: [u8; 3], opacity: f32, mode: Blend) {
    for c in 0..3 {
        let d = dst.0[c] as f32;
        let s = src[c] as f32 * opacity;
        let out = match mode {
            Blend::Over => d * (1.0 - opacity) + s,
            Blend::Additive => d + s,
        };
        dst.0[c] = out.round().clamp(0.0, 255.0) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameObserver;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn renderer(width: u32, height: u32) -> ParticleRenderer {
        ParticleRenderer::new(ParticleField::new(300, 500), Resolution::new(width, height))
            .unwrap()
    }

    struct LastFrame(AtomicU64);

    impl FrameObserver for LastFrame {
        fn on_frame(&self, frame_time: Duration, source: &dyn FrameSource) {
            // Reading the frame from inside the callback must not deadlock.
            assert!(source.current_frame().is_ok());
            self.0.store(frame_time.as_millis() as u64, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_advance_draws_and_notifies() {
        let r = renderer(160, 120);
        let observer = Arc::new(LastFrame(AtomicU64::new(0)));
        r.frame_hook().register(observer.clone());

        r.advance(Duration::from_millis(16));
        r.advance(Duration::from_millis(17));

        assert_eq!(observer.0.load(Ordering::SeqCst), 33);
        assert_eq!(r.clock(), Duration::from_millis(33));

        let frame = r.current_frame().unwrap();
        assert_eq!(frame.dimensions(), (160, 120));
        assert!(frame.pixels().any(|p| *p != BACKGROUND));
        assert_eq!(*frame.get_pixel(0, 0), BACKGROUND);
    }

    #[test]
    fn test_render_now_does_not_notify() {
        let r = renderer(64, 64);
        let observer = Arc::new(LastFrame(AtomicU64::new(7)));
        r.frame_hook().register(observer.clone());

        r.render_now().unwrap();
        assert_eq!(observer.0.load(Ordering::SeqCst), 7);
        assert_eq!(r.clock(), Duration::ZERO);
    }

    #[test]
    fn test_resize_changes_frame_size() {
        let r = renderer(64, 48);
        r.set_output_resolution(Resolution::new(320, 200), 1.0).unwrap();
        r.render_now().unwrap();
        assert_eq!(r.current_frame().unwrap().dimensions(), (320, 200));
        assert_eq!(r.output_size(), Resolution::new(320, 200));

        assert!(r.set_output_resolution(Resolution::new(0, 10), 1.0).is_err());
        assert!(r.set_output_resolution(Resolution::new(10, 10), 0.0).is_err());
        assert_eq!(r.output_size(), Resolution::new(320, 200));
    }

    #[test]
    fn test_rejects_empty_viewport() {
        assert!(ParticleRenderer::new(ParticleField::new(1, 1), Resolution::new(0, 0)).is_err());
    }

    #[test]
    fn test_fire_is_additive() {
        let mut px = Rgba([200, 100, 0, 255]);
        blend(&mut px, [200, 200, 0], 0.5, Blend::Additive);
        assert_eq!(px, Rgba([255, 200, 0, 255]));

        let mut px = Rgba([100, 100, 100, 255]);
        blend(&mut px, [0, 0, 0], 0.5, Blend::Over);
        assert_eq!(px, Rgba([50, 50, 50, 255]));
    }

    #[test]
    fn test_still_capture_through_renderer() {
        use crate::capture::{CaptureRequest, StillCapture};
        use crate::config::StillFormat;

        let r = renderer(200, 150);
        let request = CaptureRequest {
            size: Resolution::new(640, 360),
            format: StillFormat::Png,
            quality: 1.0,
            file_stem: "scene".to_string(),
        };
        let artifact = StillCapture::new().capture(&r, &request).unwrap();

        let decoded = image::load_from_memory(artifact.bytes()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 360));
        assert_eq!(r.output_size(), Resolution::new(200, 150));
    }
}
