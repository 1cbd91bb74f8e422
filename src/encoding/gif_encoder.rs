use gif::{Encoder as GifWriter, Frame as GifFrame, Repeat};

use crate::capture::Frame;
use crate::config::ContainerKind;
use crate::error::{CaptureError, CaptureResult, EncodeFailure};

use super::{
    check_layout, conform, fit_within, Artifact, ArtifactKind, Encoder, EncoderConfig,
    SequenceCheck,
};

const MAX_GIF_DIMENSION: u32 = 4096;
const MAX_GIF_FILE_SIZE: usize = 500 * 1024 * 1024;

/// Streams frames into an animated GIF held in memory.
///
/// The canvas size is fixed by the first frame (downscaled to fit
/// `MAX_GIF_DIMENSION`); later frames of a different size are resized to it.
pub struct GifEncoder {
    config: EncoderConfig,
    sequence: SequenceCheck,
    writer: Option<GifWriter<Vec<u8>>>,
    canvas: Option<(u16, u16)>,
    delay: u16,
    speed: i32,
    frames: u64,
}

impl GifEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        let fps = config.fps.clamp(1, 60);
        // GIF delays are in hundredths of a second.
        let delay = (100.0 / fps as f64).clamp(2.0, 100.0) as u16;
        // NeuQuant sampling: 1 is slowest and best, 30 fastest.
        let speed = (30.0 - config.quality.clamp(0.0, 1.0) * 29.0).round() as i32;
        Self {
            config,
            sequence: SequenceCheck::default(),
            writer: None,
            canvas: None,
            delay,
            speed: speed.clamp(1, 30),
            frames: 0,
        }
    }

    fn canvas_for(&mut self, frame: &Frame) -> CaptureResult<(u16, u16)> {
        if let Some(canvas) = self.canvas {
            return Ok(canvas);
        }
        if frame.width() == 0 || frame.height() == 0 {
            return Err(CaptureError::IngestFailed(
                "frame has zero dimension".to_string(),
            ));
        }
        let (w, h) = fit_within(frame.width(), frame.height(), MAX_GIF_DIMENSION);
        let canvas = (w as u16, h as u16);
        self.canvas = Some(canvas);
        Ok(canvas)
    }
}

impl Encoder for GifEncoder {
    fn ingest(&mut self, frame: Frame) -> CaptureResult<()> {
        self.sequence.admit(frame.sequence())?;
        check_layout(&frame)?;
        let (width, height) = self.canvas_for(&frame)?;

        let mut writer = match self.writer.take() {
            Some(writer) => writer,
            None => {
                let mut writer = GifWriter::new(Vec::new(), width, height, &[])
                    .map_err(|e| CaptureError::IngestFailed(e.to_string()))?;
                writer
                    .set_repeat(Repeat::Infinite)
                    .map_err(|e| CaptureError::IngestFailed(e.to_string()))?;
                writer
            }
        };

        let image = conform(frame.into_image(), width as u32, height as u32);
        let mut rgba = image.into_raw();
        let mut gif_frame = GifFrame::from_rgba_speed(width, height, &mut rgba, self.speed);
        gif_frame.delay = self.delay;
        writer
            .write_frame(&gif_frame)
            .map_err(|e| CaptureError::IngestFailed(e.to_string()))?;

        self.writer = Some(writer);
        self.frames += 1;
        Ok(())
    }

    fn frames_ingested(&self) -> u64 {
        self.frames
    }

    fn finalize(self: Box<Self>) -> CaptureResult<Artifact> {
        let this = *self;
        let writer = match this.writer {
            Some(writer) if this.frames > 0 => writer,
            _ => return Err(EncodeFailure::Empty.into()),
        };

        let bytes = writer.into_inner().map_err(CaptureError::codec)?;
        if bytes.len() > MAX_GIF_FILE_SIZE {
            return Err(CaptureError::codec("generated GIF exceeds maximum file size"));
        }

        Artifact::new(
            bytes,
            ArtifactKind::Video,
            ContainerKind::Gif.mime_type(),
            this.config.filename(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::time::Duration;

    fn encoder() -> GifEncoder {
        GifEncoder::new(EncoderConfig {
            container: ContainerKind::Gif,
            fps: 24,
            quality: 0.7,
            file_stem: "animation".to_string(),
        })
    }

    fn frame(sequence: u64, width: u32, height: u32) -> Frame {
        let shade = (sequence * 40 % 255) as u8;
        Frame::new(
            sequence,
            Duration::from_millis(sequence * 42),
            RgbaImage::from_pixel(width, height, Rgba([shade, 80, 200, 255])),
        )
    }

    #[test]
    fn test_encodes_animated_gif() {
        let mut encoder = Box::new(encoder());
        for seq in 0..5 {
            encoder.ingest(frame(seq, 16, 12)).unwrap();
        }
        assert_eq!(encoder.frames_ingested(), 5);

        let artifact = encoder.finalize().unwrap();
        assert_eq!(artifact.kind(), ArtifactKind::Video);
        assert_eq!(artifact.mime_type(), "image/gif");
        assert_eq!(artifact.filename(), "animation.gif");
        assert!(artifact.bytes().starts_with(b"GIF89a"));
        assert_eq!(artifact.size(), artifact.bytes().len());
    }

    #[test]
    fn test_delay_follows_fps() {
        assert_eq!(encoder().delay, 4);
        let fast = GifEncoder::new(EncoderConfig {
            fps: 60,
            ..encoder().config
        });
        assert_eq!(fast.delay, 2);
    }

    #[test]
    fn test_rejects_out_of_order_frames() {
        let mut encoder = encoder();
        encoder.ingest(frame(3, 8, 8)).unwrap();
        let err = encoder.ingest(frame(2, 8, 8)).unwrap_err();
        assert!(matches!(err, CaptureError::IngestFailed(_)));
        let err = encoder.ingest(frame(3, 8, 8)).unwrap_err();
        assert!(matches!(err, CaptureError::IngestFailed(_)));
    }

    #[test]
    fn test_finalize_without_frames_is_empty() {
        let err = Box::new(encoder()).finalize().unwrap_err();
        assert!(err.is_empty_artifact());
    }

    #[test]
    fn test_mismatched_frames_are_resized_to_canvas() {
        let mut encoder = encoder();
        encoder.ingest(frame(0, 20, 10)).unwrap();
        encoder.ingest(frame(1, 40, 20)).unwrap();
        assert_eq!(encoder.canvas, Some((20, 10)));
        assert_eq!(encoder.frames_ingested(), 2);
    }

    #[test]
    fn test_zero_sized_frame_fails_ingest() {
        let mut encoder = encoder();
        let err = encoder
            .ingest(Frame::new(0, Duration::ZERO, RgbaImage::new(0, 0)))
            .unwrap_err();
        assert!(matches!(err, CaptureError::IngestFailed(_)));
    }
}
