use std::time::Duration;

use image::RgbaImage;

use super::Resolution;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// One captured snapshot of the render surface.
///
/// Frames are not `Clone`: each one is owned by exactly one pipeline stage at
/// a time and released once the encoder has consumed it.
#[derive(Debug)]
pub struct Frame {
    sequence: u64,
    captured_at: Duration,
    image: RgbaImage,
}

impl Frame {
    pub fn new(sequence: u64, captured_at: Duration, image: RgbaImage) -> Self {
        Self {
            sequence,
            captured_at,
            image,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Renderer clock at the moment the frame was drawn.
    pub fn captured_at(&self) -> Duration {
        self.captured_at
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    pub fn format(&self) -> PixelFormat {
        PixelFormat::Rgba8
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}
