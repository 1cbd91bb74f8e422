use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::capture::{Frame, Resolution};
use crate::config::StillFormat;
use crate::error::{CaptureError, CaptureResult, EncodeFailure};

use super::{
    check_layout, conform, encode_image, Artifact, ArtifactKind, Encoder, EncoderConfig,
    SequenceCheck,
};

/// Packs every frame as a numbered still image into a zip archive.
///
/// Entries are stored uncompressed since PNG and JPEG payloads are already
/// compressed. Entry numbering is contiguous even when the frame sequence has
/// gaps from dropped frames.
pub struct SequenceEncoder {
    config: EncoderConfig,
    format: StillFormat,
    sequence: SequenceCheck,
    archive: ZipWriter<Cursor<Vec<u8>>>,
    size: Option<Resolution>,
    frames: u64,
}

impl SequenceEncoder {
    pub fn new(config: EncoderConfig, format: StillFormat) -> Self {
        Self {
            config,
            format,
            sequence: SequenceCheck::default(),
            archive: ZipWriter::new(Cursor::new(Vec::new())),
            size: None,
            frames: 0,
        }
    }

    fn entry_name(&self) -> String {
        format!("frame_{:06}.{}", self.frames, self.format.extension())
    }
}

impl Encoder for SequenceEncoder {
    fn ingest(&mut self, frame: Frame) -> CaptureResult<()> {
        self.sequence.admit(frame.sequence())?;
        check_layout(&frame)?;
        let size = *self.size.get_or_insert(frame.size());

        let image = conform(frame.into_image(), size.width, size.height);
        let encoded = encode_image(&image, self.format, self.config.quality)
            .map_err(|e| CaptureError::IngestFailed(e.to_string()))?;

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let name = self.entry_name();
        self.archive
            .start_file(name, options)
            .map_err(|e| CaptureError::IngestFailed(e.to_string()))?;
        self.archive
            .write_all(&encoded)
            .map_err(|e| CaptureError::IngestFailed(e.to_string()))?;

        self.frames += 1;
        Ok(())
    }

    fn frames_ingested(&self) -> u64 {
        self.frames
    }

    fn finalize(self: Box<Self>) -> CaptureResult<Artifact> {
        let this = *self;
        if this.frames == 0 {
            return Err(EncodeFailure::Empty.into());
        }
        let filename = this.config.filename();
        let bytes = this
            .archive
            .finish()
            .map_err(CaptureError::codec)?
            .into_inner();

        Artifact::new(
            bytes,
            ArtifactKind::Video,
            this.config.container.mime_type(),
            filename,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerKind;
    use image::{Rgba, RgbaImage};
    use std::time::Duration;

    fn encoder(format: StillFormat) -> Box<SequenceEncoder> {
        let container = match format {
            StillFormat::Png => ContainerKind::PngSequence,
            StillFormat::Jpeg => ContainerKind::JpegSequence,
        };
        Box::new(SequenceEncoder::new(
            EncoderConfig {
                container,
                fps: 24,
                quality: 0.8,
                file_stem: "frames".to_string(),
            },
            format,
        ))
    }

    fn frame(sequence: u64) -> Frame {
        Frame::new(
            sequence,
            Duration::from_millis(sequence * 42),
            RgbaImage::from_pixel(6, 4, Rgba([200, 90, 10, 255])),
        )
    }

    #[test]
    fn test_png_sequence_is_zip_archive() {
        let mut encoder = encoder(StillFormat::Png);
        encoder.ingest(frame(0)).unwrap();
        encoder.ingest(frame(2)).unwrap();
        encoder.ingest(frame(3)).unwrap();

        let artifact = encoder.finalize().unwrap();
        assert_eq!(artifact.kind(), ArtifactKind::Video);
        assert_eq!(artifact.mime_type(), "application/zip");
        assert_eq!(artifact.filename(), "frames.zip");
        assert!(artifact.bytes().starts_with(b"PK"));

        let mut archive = zip::ZipArchive::new(Cursor::new(artifact.bytes().to_vec())).unwrap();
        assert_eq!(archive.len(), 3);
        assert!(archive.by_name("frame_000002.png").is_ok());
    }

    #[test]
    fn test_jpeg_sequence_entry_names() {
        let mut encoder = encoder(StillFormat::Jpeg);
        assert_eq!(encoder.entry_name(), "frame_000000.jpg");
        encoder.ingest(frame(0)).unwrap();
        assert_eq!(encoder.entry_name(), "frame_000001.jpg");
    }

    #[test]
    fn test_duplicate_sequence_fails_fast() {
        let mut encoder = encoder(StillFormat::Png);
        encoder.ingest(frame(1)).unwrap();
        assert!(matches!(
            encoder.ingest(frame(1)),
            Err(CaptureError::IngestFailed(_))
        ));
        assert_eq!(encoder.frames_ingested(), 1);
    }

    #[test]
    fn test_empty_sequence_fails() {
        let err = encoder(StillFormat::Jpeg).finalize().unwrap_err();
        assert!(err.is_empty_artifact());
    }
}
