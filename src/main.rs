// src/main.rs
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn, Level};

use betagen_pose::config::{BackendConfig, FallbackMode, PipelineConfig};
use betagen_pose::data::{ExportContext, FrameDumper, KeypointExporter, TrackingCsvWriter};
use betagen_pose::error::PipelineError;
use betagen_pose::estimator;
use betagen_pose::pipeline::{DriverSettings, FrameObserver, PipelineDriver, RunSummary};
use betagen_pose::preview::PreviewWindow;
use betagen_pose::video::{FfmpegSink, FfmpegSource, FrameSource, VideoSink};

/// Overlay a smoothed pose skeleton onto a climbing video
#[derive(Parser, Debug)]
#[command(name = "betagen_pose", version, about, long_about = None)]
struct Cli {
    /// Input video
    #[arg(short, long)]
    input: PathBuf,

    /// Output video with the skeleton drawn in
    #[arg(short, long)]
    output: PathBuf,

    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run pose inference every N frames
    #[arg(long, allow_negative_numbers = true)]
    every_n: Option<i64>,

    /// Smoothing weight of the history in [0, 1]
    #[arg(long, allow_negative_numbers = true)]
    alpha: Option<f64>,

    /// Hide landmarks below this confidence
    #[arg(long, allow_negative_numbers = true)]
    min_visibility: Option<f64>,

    /// Stop after this many frames (0 = all)
    #[arg(long)]
    max_frames: Option<u64>,

    /// Show a live preview; Esc stops early
    #[arg(long)]
    display: bool,

    /// Output size, "original" or WIDTHxHEIGHT
    #[arg(long)]
    output_resolution: Option<String>,

    /// Replay detections from a keypoints JSON file
    #[arg(long, value_name = "PATH", conflicts_with_all = ["backend_cmd", "no_backend"])]
    replay: Option<PathBuf>,

    /// Pose helper program speaking line-delimited JSON on stdio
    #[arg(long, value_name = "PROGRAM", conflicts_with = "no_backend")]
    backend_cmd: Option<String>,

    /// Argument passed to the pose helper (repeatable)
    #[arg(long = "backend-arg", value_name = "ARG", allow_hyphen_values = true)]
    backend_args: Vec<String>,

    /// Run without a pose backend
    #[arg(long)]
    no_backend: bool,

    /// Behaviour when the pose backend is unavailable
    #[arg(long, value_enum)]
    fallback: Option<FallbackMode>,

    /// Save every k-th output frame as JPEG
    #[arg(long, value_name = "K")]
    dump_every: Option<u64>,

    #[arg(long)]
    dump_dir: Option<PathBuf>,

    /// Write smoothed keypoints as JSON
    #[arg(long, value_name = "PATH")]
    keypoints_json: Option<PathBuf>,

    /// Write per-frame tracking rows as CSV
    #[arg(long, value_name = "PATH")]
    tracking_csv: Option<PathBuf>,

    /// Video id recorded in the keypoints JSON (default: random UUID)
    #[arg(long)]
    video_id: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(every_n) = self.every_n {
            config.every_n = every_n;
        }
        if let Some(alpha) = self.alpha {
            config.alpha = alpha;
        }
        if let Some(min_visibility) = self.min_visibility {
            config.min_visibility = min_visibility;
        }
        if let Some(max_frames) = self.max_frames {
            config.max_frames = max_frames;
        }
        config.display |= self.display;
        if let Some(resolution) = &self.output_resolution {
            config.output_resolution = resolution.clone();
        }

        if let Some(path) = &self.replay {
            config.backend = BackendConfig::Replay { path: path.clone() };
        } else if let Some(program) = &self.backend_cmd {
            config.backend = BackendConfig::Command {
                program: program.clone(),
                args: self.backend_args.clone(),
            };
        } else if self.no_backend {
            config.backend = BackendConfig::None;
        }

        if let Some(fallback) = self.fallback {
            config.fallback = fallback;
        }
        if let Some(dump_every) = self.dump_every {
            config.dump_every = dump_every;
        }
        if let Some(dir) = &self.dump_dir {
            config.dump_dir = dir.clone();
        }
        if self.keypoints_json.is_some() {
            config.keypoints_json = self.keypoints_json.clone();
        }
        if self.tracking_csv.is_some() {
            config.tracking_csv = self.tracking_csv.clone();
        }
        if self.video_id.is_some() {
            config.video_id = self.video_id.clone();
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(summary) => {
            info!(
                "Done: {} frames written to {} ({} with skeleton)",
                summary.frames,
                cli.output.display(),
                summary.rendered
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: &Cli) -> Result<RunSummary, PipelineError> {
    let mut config = PipelineConfig::load_or_default(cli.config.as_deref())?;
    cli.apply(&mut config);
    let settings = DriverSettings::from_config(&config)?;
    let resolution = config.resolution()?;

    let mut source = FfmpegSource::open(&cli.input).map_err(|source| PipelineError::OpenInput {
        path: cli.input.clone(),
        source,
    })?;
    let info = source.info();
    let (width, height) = resolution.resolve(info.width, info.height);
    info!(
        "Input {}: {}x{} @ {:.2} fps, output {}x{}",
        cli.input.display(),
        info.width,
        info.height,
        info.fps,
        width,
        height
    );

    let mut sink = FfmpegSink::open(&cli.output, width, height, info.fps).map_err(|source| {
        PipelineError::OpenOutput {
            path: cli.output.clone(),
            source,
        }
    })?;

    let backend = estimator::from_config(&config.backend);
    let mut driver = PipelineDriver::new(settings, backend, config.fallback)?;

    let mut observers: Vec<Box<dyn FrameObserver>> = Vec::new();
    if let Some(path) = &config.keypoints_json {
        let context = ExportContext {
            model: driver.backend_name().to_string(),
            output_size: (width, height),
            every_n: config.stride(),
            alpha: config.alpha,
            min_visibility: config.min_visibility,
            degraded: driver.is_degraded(),
        };
        observers.push(Box::new(KeypointExporter::new(path, config.video_id.clone(), &context)));
    }
    if let Some(path) = &config.tracking_csv {
        observers.push(Box::new(TrackingCsvWriter::create(path)?));
    }
    if config.dump_every > 0 {
        observers.push(Box::new(FrameDumper::new(&config.dump_dir, config.dump_every)?));
    }
    if config.display {
        match PreviewWindow::open("betagen_pose", width, height) {
            Ok(window) => observers.push(Box::new(window)),
            Err(e) => warn!("--display ignored: {}", e),
        }
    }

    let mut observer_refs: Vec<&mut dyn FrameObserver> = Vec::with_capacity(observers.len());
    for observer in observers.iter_mut() {
        observer_refs.push(observer.as_mut());
    }
    let summary = driver.run(&mut source, &mut sink, &mut observer_refs)?;

    // Closing explicitly surfaces encoder failures that Drop would swallow
    sink.close()?;
    Ok(summary)
}
