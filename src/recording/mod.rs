mod controller;
mod sampler;
mod session;

pub use controller::{PendingArtifact, RecordingController};
pub use sampler::{FrameSampler, SamplerStats};
pub use session::{format_timer, RecordingSession, SessionReport};

use crate::config::{render_template, Config, ContainerKind};
use crate::encoding::EncoderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Finalizing,
}

#[derive(Debug, Clone)]
pub struct RecordingSettings {
    pub fps: u32,
    pub quality: f32,
    pub container: ContainerKind,
    /// Frames that may wait for the encoder before new ones are dropped.
    pub queue_capacity: usize,
    /// strftime template for the artifact filename.
    pub filename_template: String,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            fps: 24,
            quality: 0.7,
            container: ContainerKind::Gif,
            queue_capacity: 48,
            filename_template: "animation_%Y%m%d_%H%M%S".to_string(),
        }
    }
}

impl RecordingSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fps: config.recording.fps,
            quality: config.recording.quality,
            container: config.recording.container,
            queue_capacity: config.recording.queue_capacity,
            filename_template: config.output.video_template.clone(),
        }
    }

    pub(crate) fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            container: self.container,
            fps: self.fps,
            quality: self.quality,
            file_stem: render_template(&self.filename_template, "animation"),
        }
    }
}
