use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, RgbaImage};

use crate::config::StillFormat;

use super::jpeg_quality;

const MAX_IMAGE_DIMENSION: u32 = 16384;

/// Encodes a single RGBA buffer as PNG or JPEG.
///
/// JPEG drops the alpha channel; `quality` (0.0 to 1.0) only affects JPEG.
pub fn encode_image(image: &RgbaImage, format: StillFormat, quality: f32) -> Result<Vec<u8>> {
    if image.width() > MAX_IMAGE_DIMENSION || image.height() > MAX_IMAGE_DIMENSION {
        return Err(anyhow!("Image too large to encode"));
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(anyhow!("Image has zero dimension"));
    }

    let mut bytes = Vec::new();
    match format {
        StillFormat::Png => {
            PngEncoder::new(&mut bytes).write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ExtendedColorType::Rgba8,
            )?;
        }
        StillFormat::Jpeg => {
            let rgb_image = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut bytes, jpeg_quality(quality)).write_image(
                rgb_image.as_raw(),
                rgb_image.width(),
                rgb_image.height(),
                image::ExtendedColorType::Rgb8,
            )?;
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_encode_png_signature() {
        let image = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        let bytes = encode_image(&image, StillFormat::Png, 1.0).unwrap();
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn test_encode_jpeg_signature() {
        let image = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 128]));
        let bytes = encode_image(&image, StillFormat::Jpeg, 0.7).unwrap();
        assert!(bytes.starts_with(&[0xFF, 0xD8]));
    }

    #[test]
    fn test_rejects_zero_dimension() {
        assert!(encode_image(&RgbaImage::new(0, 5), StillFormat::Png, 1.0).is_err());
    }
}
