use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const MIN_FPS: u32 = 1;
const MAX_RECORD_FPS: u32 = 60;
const MAX_RENDER_FPS: u32 = 240;
const MIN_QUEUE_CAPACITY: usize = 1;
const MAX_QUEUE_CAPACITY: usize = 1024;
const MAX_STILL_DIMENSION: u32 = 16384;
const MAX_VIEWPORT_DIMENSION: u32 = 8192;
const MAX_PARTICLES: u32 = 200_000;
const MAX_FILENAME_TEMPLATE_LEN: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub output: OutputConfig,
    pub recording: RecordingConfig,
    pub still: StillConfig,
    #[serde(default)]
    pub scene: SceneConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub video_template: String,
    pub still_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordingConfig {
    pub fps: u32,
    pub quality: f32,
    pub container: ContainerKind,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StillConfig {
    pub width: u32,
    pub height: u32,
    pub format: StillFormat,
    pub quality: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneConfig {
    pub width: u32,
    pub height: u32,
    pub render_fps: u32,
    pub earth_particles: u32,
    pub fire_particles: u32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            render_fps: 60,
            earth_particles: 3000,
            fire_particles: 5000,
        }
    }
}

/// Container used for recorded clips.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ContainerKind {
    #[default]
    Gif,
    PngSequence,
    JpegSequence,
}

impl ContainerKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerKind::Gif => "gif",
            ContainerKind::PngSequence | ContainerKind::JpegSequence => "zip",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerKind::Gif => "image/gif",
            ContainerKind::PngSequence | ContainerKind::JpegSequence => "application/zip",
        }
    }

    pub fn all() -> &'static [ContainerKind] {
        &[
            ContainerKind::Gif,
            ContainerKind::PngSequence,
            ContainerKind::JpegSequence,
        ]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ContainerKind::Gif => "Animated GIF",
            ContainerKind::PngSequence => "PNG sequence (zip)",
            ContainerKind::JpegSequence => "JPEG sequence (zip)",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StillFormat {
    #[default]
    Jpeg,
    Png,
}

impl StillFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            StillFormat::Jpeg => "jpg",
            StillFormat::Png => "png",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            StillFormat::Jpeg => "image/jpeg",
            StillFormat::Png => "image/png",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            StillFormat::Jpeg => "JPEG",
            StillFormat::Png => "PNG",
        }
    }
}

fn valid_quality(quality: f32) -> bool {
    quality.is_finite() && (0.0..=1.0).contains(&quality)
}

fn valid_template(template: &str) -> bool {
    !template.is_empty()
        && template.len() <= MAX_FILENAME_TEMPLATE_LEN
        && !template.contains('/')
        && !template.contains('\\')
        && !template.contains("..")
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.recording.fps < MIN_FPS || self.recording.fps > MAX_RECORD_FPS {
            return Err(anyhow!(
                "recording fps must be between {} and {}",
                MIN_FPS,
                MAX_RECORD_FPS
            ));
        }
        if !valid_quality(self.recording.quality) {
            return Err(anyhow!("recording quality must be between 0.0 and 1.0"));
        }
        if self.recording.queue_capacity < MIN_QUEUE_CAPACITY
            || self.recording.queue_capacity > MAX_QUEUE_CAPACITY
        {
            return Err(anyhow!(
                "queue_capacity must be between {} and {}",
                MIN_QUEUE_CAPACITY,
                MAX_QUEUE_CAPACITY
            ));
        }
        if self.still.width == 0
            || self.still.height == 0
            || self.still.width > MAX_STILL_DIMENSION
            || self.still.height > MAX_STILL_DIMENSION
        {
            return Err(anyhow!(
                "still size must be between 1 and {} on each side",
                MAX_STILL_DIMENSION
            ));
        }
        if !valid_quality(self.still.quality) {
            return Err(anyhow!("still quality must be between 0.0 and 1.0"));
        }
        if self.scene.width == 0
            || self.scene.height == 0
            || self.scene.width > MAX_VIEWPORT_DIMENSION
            || self.scene.height > MAX_VIEWPORT_DIMENSION
        {
            return Err(anyhow!("scene viewport size is out of range"));
        }
        if self.scene.render_fps < MIN_FPS || self.scene.render_fps > MAX_RENDER_FPS {
            return Err(anyhow!(
                "render_fps must be between {} and {}",
                MIN_FPS,
                MAX_RENDER_FPS
            ));
        }
        if self.scene.earth_particles > MAX_PARTICLES || self.scene.fire_particles > MAX_PARTICLES {
            return Err(anyhow!("particle counts must be <= {}", MAX_PARTICLES));
        }
        if !valid_template(&self.output.video_template)
            || !valid_template(&self.output.still_template)
        {
            return Err(anyhow!("filename template contains invalid path characters"));
        }
        Ok(())
    }

    fn sanitize(&mut self) {
        let defaults = Config::default();

        self.recording.fps = self.recording.fps.clamp(MIN_FPS, MAX_RECORD_FPS);
        self.recording.queue_capacity = self
            .recording
            .queue_capacity
            .clamp(MIN_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY);
        self.recording.quality = if self.recording.quality.is_finite() {
            self.recording.quality.clamp(0.0, 1.0)
        } else {
            defaults.recording.quality
        };

        self.still.width = self.still.width.clamp(1, MAX_STILL_DIMENSION);
        self.still.height = self.still.height.clamp(1, MAX_STILL_DIMENSION);
        self.still.quality = if self.still.quality.is_finite() {
            self.still.quality.clamp(0.0, 1.0)
        } else {
            defaults.still.quality
        };

        self.scene.width = self.scene.width.clamp(1, MAX_VIEWPORT_DIMENSION);
        self.scene.height = self.scene.height.clamp(1, MAX_VIEWPORT_DIMENSION);
        self.scene.render_fps = self.scene.render_fps.clamp(MIN_FPS, MAX_RENDER_FPS);
        self.scene.earth_particles = self.scene.earth_particles.min(MAX_PARTICLES);
        self.scene.fire_particles = self.scene.fire_particles.min(MAX_PARTICLES);

        if !valid_template(&self.output.video_template) {
            self.output.video_template = defaults.output.video_template;
        }
        if !valid_template(&self.output.still_template) {
            self.output.still_template = defaults.output.still_template;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let videos_dir = directories::UserDirs::new()
            .and_then(|d| d.video_dir().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| {
                directories::BaseDirs::new()
                    .map(|b| b.home_dir().to_path_buf())
                    .unwrap_or_else(|| PathBuf::from("."))
            });

        Self {
            output: OutputConfig {
                directory: videos_dir.join("embercap"),
                video_template: "animation_%Y%m%d_%H%M%S".to_string(),
                still_template: "capture_%Y%m%d_%H%M%S".to_string(),
            },
            recording: RecordingConfig {
                fps: 24,
                quality: 0.7,
                container: ContainerKind::Gif,
                queue_capacity: 48,
            },
            still: StillConfig {
                width: 3840,
                height: 2160,
                format: StillFormat::Jpeg,
                quality: 1.0,
            },
            scene: SceneConfig::default(),
        }
    }
}

impl Config {
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "embercap", "embercap").map(|p| p.config_dir().to_path_buf())
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                let content = fs::read_to_string(&path)?;
                return Self::from_toml(&content);
            }
        }
        Ok(Config::default())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf> {
        self.validate()?;
        let dir = Self::config_dir().ok_or_else(|| anyhow!("No config directory available"))?;
        fs::create_dir_all(&dir)?;
        let path = dir.join("config.toml");
        fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(path)
    }

    /// Filename stem for a new still capture, from `output.still_template`.
    pub fn still_stem(&self) -> String {
        render_template(&self.output.still_template, "capture")
    }
}

/// Expands a strftime template into a filesystem-safe filename stem.
pub(crate) fn render_template(template: &str, fallback: &str) -> String {
    use std::fmt::Write;

    let now = chrono::Local::now();
    let mut formatted = String::new();
    // Unknown strftime specifiers surface as a formatting error.
    if write!(formatted, "{}", now.format(template)).is_err() {
        formatted.clear();
    }
    let sanitized: String = formatted
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .take(200)
        .collect();
    if sanitized.is_empty() {
        format!("{}_{}", fallback, now.timestamp())
    } else {
        sanitized
    }
}
