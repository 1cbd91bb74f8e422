mod gif_encoder;
mod sequence;
mod still;

pub use gif_encoder::GifEncoder;
pub use sequence::SequenceEncoder;
pub use still::encode_image;

use std::time::Duration;

use image::{Rgba, RgbaImage};
use serde::Serialize;

use crate::capture::{Frame, PixelFormat};
use crate::config::{ContainerKind, StillFormat};
use crate::error::{CaptureError, CaptureResult, EncodeFailure};

const MIN_FPS: u32 = 1;
const MAX_FPS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArtifactKind {
    Video,
    Image,
}

/// Final output of a recording session or a still capture.
///
/// An `Artifact` always holds at least one byte; encoders that would produce
/// nothing fail with [`EncodeFailure::Empty`] instead.
#[derive(Debug, Clone)]
pub struct Artifact {
    bytes: Vec<u8>,
    kind: ArtifactKind,
    mime_type: &'static str,
    filename: String,
}

impl Artifact {
    pub fn new(
        bytes: Vec<u8>,
        kind: ArtifactKind,
        mime_type: &'static str,
        filename: String,
    ) -> CaptureResult<Self> {
        if bytes.is_empty() {
            return Err(EncodeFailure::Empty.into());
        }
        Ok(Self {
            bytes,
            kind,
            mime_type,
            filename,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    /// Suggested filename, including extension.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Codec and container settings for one session. Fixed once the encoder is
/// initialized.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub container: ContainerKind,
    pub fps: u32,
    /// 0.0 (smallest) to 1.0 (best).
    pub quality: f32,
    /// Filename without extension for the finished artifact.
    pub file_stem: String,
}

impl EncoderConfig {
    pub fn validate(&self) -> CaptureResult<()> {
        if self.fps < MIN_FPS || self.fps > MAX_FPS {
            return Err(CaptureError::EncoderUnavailable(format!(
                "fps must be between {} and {}",
                MIN_FPS, MAX_FPS
            )));
        }
        if !self.quality.is_finite() || !(0.0..=1.0).contains(&self.quality) {
            return Err(CaptureError::EncoderUnavailable(
                "quality must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.file_stem.is_empty() {
            return Err(CaptureError::EncoderUnavailable(
                "file stem is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn filename(&self) -> String {
        format!("{}.{}", self.file_stem, self.container.extension())
    }
}

/// Session-scoped encoder.
///
/// `finalize` consumes the encoder, so it can run at most once per session.
pub trait Encoder: Send {
    /// Accepts the next frame. Sequence numbers must be strictly increasing.
    fn ingest(&mut self, frame: Frame) -> CaptureResult<()>;

    fn frames_ingested(&self) -> u64;

    fn finalize(self: Box<Self>) -> CaptureResult<Artifact>;
}

/// Creates encoders for new sessions.
pub trait EncoderBackend: Send + Sync {
    fn initialize(&self, config: &EncoderConfig) -> CaptureResult<Box<dyn Encoder>>;
}

/// In-process GIF and image-sequence encoders.
///
/// A value of this type only exists once the codec self-test has passed, so a
/// controller built on it can never start a session against an encoder that
/// is not ready.
#[derive(Debug, Clone)]
pub struct NativeBackend {
    _ready: (),
}

impl NativeBackend {
    /// Runs the codec self-test off the async executor.
    pub async fn prepare() -> CaptureResult<Self> {
        tokio::task::spawn_blocking(Self::prepare_blocking)
            .await
            .map_err(|e| CaptureError::EncoderUnavailable(e.to_string()))?
    }

    pub fn prepare_blocking() -> CaptureResult<Self> {
        Self::self_test().map_err(|e| CaptureError::EncoderUnavailable(e.to_string()))?;
        tracing::debug!("native encoders ready");
        Ok(Self { _ready: () })
    }

    fn self_test() -> anyhow::Result<()> {
        let sample = RgbaImage::from_pixel(2, 2, Rgba([255, 69, 0, 255]));
        for container in ContainerKind::all() {
            let config = EncoderConfig {
                container: *container,
                fps: 24,
                quality: 0.5,
                file_stem: "self_test".to_string(),
            };
            let mut encoder = build_encoder(&config);
            encoder.ingest(Frame::new(0, Duration::ZERO, sample.clone()))?;
            encoder.finalize()?;
        }
        Ok(())
    }
}

impl EncoderBackend for NativeBackend {
    fn initialize(&self, config: &EncoderConfig) -> CaptureResult<Box<dyn Encoder>> {
        config.validate()?;
        Ok(build_encoder(config))
    }
}

fn build_encoder(config: &EncoderConfig) -> Box<dyn Encoder> {
    match config.container {
        ContainerKind::Gif => Box::new(GifEncoder::new(config.clone())),
        ContainerKind::PngSequence => {
            Box::new(SequenceEncoder::new(config.clone(), StillFormat::Png))
        }
        ContainerKind::JpegSequence => {
            Box::new(SequenceEncoder::new(config.clone(), StillFormat::Jpeg))
        }
    }
}

/// Rejects sequence numbers that do not strictly increase. Gaps are fine.
#[derive(Debug, Default)]
pub(crate) struct SequenceCheck {
    last: Option<u64>,
}

impl SequenceCheck {
    pub(crate) fn admit(&mut self, sequence: u64) -> CaptureResult<()> {
        if let Some(last) = self.last {
            if sequence <= last {
                return Err(CaptureError::IngestFailed(format!(
                    "frame {} arrived after frame {}",
                    sequence, last
                )));
            }
        }
        self.last = Some(sequence);
        Ok(())
    }
}

/// Rejects frames with no pixels or whose buffer does not match their size.
pub(crate) fn check_layout(frame: &Frame) -> CaptureResult<()> {
    let expected = buffer_len(frame.width(), frame.height(), frame.format());
    if expected == 0 {
        return Err(CaptureError::IngestFailed(format!(
            "frame {} is empty",
            frame.sequence()
        )));
    }
    if frame.pixels().len() != expected {
        return Err(CaptureError::IngestFailed(format!(
            "frame {} holds {} bytes, expected {}",
            frame.sequence(),
            frame.pixels().len(),
            expected
        )));
    }
    Ok(())
}

fn buffer_len(width: u32, height: u32, format: PixelFormat) -> usize {
    width as usize * height as usize * format.bytes_per_pixel()
}

/// Largest size within `max` on both axes, keeping the aspect ratio.
pub(crate) fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let scale_w = max as f64 / width as f64;
    let scale_h = max as f64 / height as f64;
    let scale = scale_w.min(scale_h);
    let new_w = ((width as f64) * scale).round() as u32;
    let new_h = ((height as f64) * scale).round() as u32;
    (new_w.clamp(1, max), new_h.clamp(1, max))
}

/// Resizes `image` to exactly `width`x`height` if it is not already that size.
pub(crate) fn conform(image: RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.width() == width && image.height() == height {
        image
    } else {
        image::imageops::resize(
            &image,
            width,
            height,
            image::imageops::FilterType::Triangle,
        )
    }
}

pub(crate) fn jpeg_quality(quality: f32) -> u8 {
    (quality.clamp(0.0, 1.0) * 100.0).round().clamp(1.0, 100.0) as u8
}
