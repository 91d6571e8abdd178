// src/bin/probe_video.rs - Checks that a video can be decoded before running the overlay on it
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use betagen_pose::video::{self, FfmpegSource, FrameSource};

/// Print stream info of a video and decode its first frame
#[derive(Parser, Debug)]
#[command(name = "probe_video", version, about)]
struct Args {
    /// Video to inspect
    input: PathBuf,

    /// Also save the first frame as an image
    #[arg(long, value_name = "PATH")]
    save_first: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    println!("Probing {}...\n", args.input.display());

    let info = video::probe(&args.input)
        .with_context(|| format!("failed to read stream info of {}", args.input.display()))?;
    println!("✓ Stream: {}x{} @ {:.2} fps", info.width, info.height, info.fps);

    let mut source = FfmpegSource::open(&args.input).context("failed to start decoder")?;
    let Some(frame) = source.next_frame().context("failed to decode")? else {
        bail!("{} contains no frames", args.input.display());
    };
    println!("✓ First frame decoded ({}x{})", frame.width(), frame.height());

    if let Some(path) = &args.save_first {
        frame
            .save(path)
            .with_context(|| format!("failed to save {}", path.display()))?;
        println!("✓ Saved {}", path.display());
    }

    Ok(())
}
