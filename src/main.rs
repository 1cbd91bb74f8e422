mod capture;
mod config;
mod encoding;
mod error;
mod output;
mod recording;
mod scene;

#[cfg(test)]
mod test_support;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use capture::{CaptureRequest, FrameSource, Resolution, StillCapture};
use config::{Config, ContainerKind, StillFormat};
use encoding::{Artifact, ArtifactKind, NativeBackend};
use recording::{format_timer, RecordingController, RecordingSettings, SessionReport};
use scene::ParticleRenderer;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Record(args) => run_record(config, args),
        Commands::Still(args) => run_still(config, args),
        Commands::Config { init } => run_config(config, init),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Config::from_toml(&content)
        }
        None => Ok(Config::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring unreadable config, using defaults");
            Config::default()
        })),
    }
}

fn run_record(mut config: Config, args: RecordArgs) -> Result<()> {
    if let Some(fps) = args.fps {
        config.recording.fps = fps;
    }
    if let Some(container) = args.container {
        config.recording.container = container.into();
    }
    if let Some(quality) = args.quality {
        config.recording.quality = quality;
    }
    if let Some(dir) = args.output {
        config.output.directory = dir;
    }
    config.validate()?;
    if args.seconds <= 0.0 || !args.seconds.is_finite() {
        return Err(anyhow!("Recording length must be a positive number of seconds"));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()?;
    let backend = runtime.block_on(NativeBackend::prepare())?;

    let renderer = Arc::new(ParticleRenderer::from_config(&config.scene)?);
    let source: Arc<dyn FrameSource> = renderer.clone();
    let controller = RecordingController::new(
        source,
        Arc::new(backend),
        RecordingSettings::from_config(&config),
    );

    let render_fps = config.scene.render_fps;
    let frame_delta = Duration::from_secs(1) / render_fps;
    let total_frames = (args.seconds * render_fps as f32).round() as u64;

    controller.start()?;
    runtime.block_on(async {
        let mut ticker = tokio::time::interval(frame_delta);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut shown = 0;
        for _ in 0..total_frames {
            ticker.tick().await;
            renderer.advance(frame_delta);
            if !controller.is_recording() {
                tracing::warn!(state = ?controller.state(), "recording ended early");
                break;
            }

            let elapsed = controller.elapsed_secs();
            if elapsed != shown {
                shown = elapsed;
                tracing::info!(timer = %format_timer(elapsed), "recording");
            }
        }
    });

    let pending = controller
        .stop()
        .ok_or_else(|| anyhow!("Recording ended without a session"))?;
    tracing::debug!(session = %pending.session_id(), "waiting for encoder");
    let artifact = pending.wait()?;
    tracing::debug!(scene_time = ?renderer.clock(), "render loop finished");
    let path = output::save_artifact(&artifact, &config.output.directory)?;

    print_summary(&artifact, &path, controller.last_report(), args.json)
}

fn run_still(mut config: Config, mut args: StillArgs) -> Result<()> {
    if let Some(dir) = args.output.take() {
        config.output.directory = dir;
    }

    let renderer = ParticleRenderer::from_config(&config.scene)?;
    let at = Duration::try_from_secs_f32(args.at)
        .map_err(|_| anyhow!("Scene time must be a non-negative number of seconds"))?;
    renderer.advance(at);

    let request = still_request(&config, &args, renderer.output_size());
    let artifact = StillCapture::new().capture(&renderer, &request)?;
    let path = output::save_artifact(&artifact, &config.output.directory)?;

    print_summary(&artifact, &path, None, args.json)
}

/// Builds the capture request from the config, a preset and CLI overrides.
fn still_request(config: &Config, args: &StillArgs, current: Resolution) -> CaptureRequest {
    let mut request = match args.preset {
        Some(preset) => {
            let mut request = match preset {
                Preset::Uhd4k => CaptureRequest::uhd_4k(),
                Preset::Uhd8k => CaptureRequest::uhd_8k(),
                Preset::Current => CaptureRequest::new(current, config.still.format),
            };
            request.file_stem = config.still_stem();
            request.quality = config.still.quality;
            request
        }
        None => {
            let mut request = CaptureRequest::from_config(config);
            request.size = Resolution::new(
                args.width.unwrap_or(request.size.width),
                args.height.unwrap_or(request.size.height),
            );
            request
        }
    };
    if let Some(format) = args.format {
        request.format = format.into();
    }
    if let Some(quality) = args.quality {
        request.quality = quality;
    }
    request
}

fn run_config(config: Config, init: bool) -> Result<()> {
    if init {
        let path = config.save()?;
        println!("{}", path.display());
        return Ok(());
    }
    if let Some(path) = Config::config_path() {
        println!("# {}", path.display());
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

#[derive(Serialize)]
struct Summary<'a> {
    path: &'a Path,
    kind: ArtifactKind,
    mime_type: &'a str,
    bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<SessionReport>,
}

fn print_summary(
    artifact: &Artifact,
    path: &Path,
    report: Option<SessionReport>,
    json: bool,
) -> Result<()> {
    if json {
        let summary = Summary {
            path,
            kind: artifact.kind(),
            mime_type: artifact.mime_type(),
            bytes: artifact.size(),
            report,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{} ({} bytes)", path.display(), artifact.size());
    if let Some(report) = report {
        println!(
            "{} at {} fps: {} rendered, {} encoded, {} not encoded ({} skipped, {} dropped)",
            format_timer(report.elapsed_secs),
            report.target_fps,
            report.frames_rendered,
            report.frames_encoded,
            report.drop_count(),
            report.frames_skipped,
            report.frames_dropped
        );
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Record the ember particle scene to clips and stills", long_about = None)]
struct Cli {
    /// Config file to use instead of the one in the user config directory.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render the scene for a while and record it as a clip.
    Record(RecordArgs),
    /// Render one high-resolution still of the scene.
    Still(StillArgs),
    /// Print the effective configuration.
    Config {
        /// Write the effective configuration to the config directory.
        #[arg(long)]
        init: bool,
    },
}

#[derive(clap::Args, Debug)]
struct RecordArgs {
    /// Recording length in seconds of scene time.
    #[arg(short, long, default_value_t = 5.0)]
    seconds: f32,
    /// Target frames per second of the clip.
    #[arg(long)]
    fps: Option<u32>,
    #[arg(long, value_enum)]
    container: Option<ContainerArg>,
    /// 0.0 to 1.0.
    #[arg(long)]
    quality: Option<f32>,
    /// Directory the clip is written to.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct StillArgs {
    #[arg(long, value_enum, conflicts_with_all = ["width", "height"])]
    preset: Option<Preset>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long, value_enum)]
    format: Option<FormatArg>,
    /// JPEG quality, 0.0 to 1.0.
    #[arg(long)]
    quality: Option<f32>,
    /// Scene time in seconds at which the still is taken.
    #[arg(long, default_value_t = 0.0)]
    at: f32,
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ContainerArg {
    Gif,
    PngSequence,
    JpegSequence,
}

impl From<ContainerArg> for ContainerKind {
    fn from(arg: ContainerArg) -> Self {
        match arg {
            ContainerArg::Gif => ContainerKind::Gif,
            ContainerArg::PngSequence => ContainerKind::PngSequence,
            ContainerArg::JpegSequence => ContainerKind::JpegSequence,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Jpeg,
    Png,
}

impl From<FormatArg> for StillFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Jpeg => StillFormat::Jpeg,
            FormatArg::Png => StillFormat::Png,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Preset {
    #[value(name = "4k")]
    Uhd4k,
    #[value(name = "8k")]
    Uhd8k,
    /// The scene's configured viewport size.
    Current,
}
