use crate::config::{render_template, Config, StillFormat};
use crate::encoding::{encode_image, Artifact, ArtifactKind};
use crate::error::{CaptureError, CaptureResult};

use super::{RenderSurface, Resolution};

/// Parameters for one high-resolution still.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub size: Resolution,
    pub format: StillFormat,
    /// JPEG quality, 0.0 to 1.0. Ignored for PNG.
    pub quality: f32,
    pub file_stem: String,
}

impl CaptureRequest {
    pub fn new(size: Resolution, format: StillFormat) -> Self {
        Self {
            size,
            format,
            quality: 1.0,
            file_stem: render_template("capture_%Y%m%d_%H%M%S", "capture"),
        }
    }

    pub fn uhd_4k() -> Self {
        Self::new(Resolution::UHD_4K, StillFormat::Jpeg)
    }

    pub fn uhd_8k() -> Self {
        Self::new(Resolution::UHD_8K, StillFormat::Jpeg)
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            size: Resolution::new(config.still.width, config.still.height),
            format: config.still.format,
            quality: config.still.quality,
            file_stem: config.still_stem(),
        }
    }

    pub fn filename(&self) -> String {
        format!("{}.{}", self.file_stem, self.format.extension())
    }
}

/// Renders one frame at a requested resolution and encodes it to an image.
///
/// The surface's resolution and display scale are always put back the way
/// they were, whether the capture succeeds or not. Only one capture per
/// surface runs at a time, claimed through the surface's
/// [`CaptureLock`](super::CaptureLock); a concurrent call fails with
/// [`CaptureError::CaptureInProgress`].
#[derive(Debug, Default)]
pub struct StillCapture;

impl StillCapture {
    pub fn new() -> Self {
        Self
    }

    pub fn capture(
        &self,
        surface: &dyn RenderSurface,
        request: &CaptureRequest,
    ) -> CaptureResult<Artifact> {
        let _claim = surface
            .capture_lock()
            .try_acquire()
            .ok_or(CaptureError::CaptureInProgress)?;

        if request.size.is_empty() {
            return Err(CaptureError::still(format!(
                "requested size {} is empty",
                request.size
            )));
        }

        let original = surface.output_size();
        let original_scale = surface.display_scale();
        tracing::info!(
            from = %original,
            to = %request.size,
            format = request.format.display_name(),
            "capturing still"
        );

        let image = {
            // Restores the surface on every path out of this block.
            let _restore = ResolutionGuard {
                surface,
                size: original,
                scale: original_scale,
            };
            surface
                .set_output_resolution(request.size, 1.0)
                .map_err(|e| CaptureError::still(format!("resize failed: {}", e)))?;
            surface
                .render_now()
                .map_err(|e| CaptureError::still(format!("render failed: {}", e)))?;
            surface
                .current_frame()
                .map_err(|e| CaptureError::still(format!("readback failed: {}", e)))?
        };

        if image.width() != request.size.width || image.height() != request.size.height {
            return Err(CaptureError::still(format!(
                "surface produced {}x{}, expected {}",
                image.width(),
                image.height(),
                request.size
            )));
        }

        let bytes = encode_image(&image, request.format, request.quality)
            .map_err(CaptureError::still)?;
        let artifact = Artifact::new(
            bytes,
            ArtifactKind::Image,
            request.format.mime_type(),
            request.filename(),
        )
        .map_err(|_| CaptureError::still("encoder produced no data"))?;

        tracing::info!(bytes = artifact.size(), file = artifact.filename(), "still captured");
        Ok(artifact)
    }
}

struct ResolutionGuard<'a> {
    surface: &'a dyn RenderSurface,
    size: Resolution,
    scale: f32,
}

impl Drop for ResolutionGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.surface.set_output_resolution(self.size, self.scale) {
            tracing::error!(size = %self.size, error = %err, "failed to restore output resolution");
        }
    }
}
