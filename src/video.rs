// src/video.rs - Frame source / video sink backed by ffmpeg child processes
use std::borrow::Cow;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::VideoError;

/// Used when the container reports no usable frame rate.
pub const FALLBACK_FPS: f64 = 30.0;

/// Encoders tried in order when opening an output file.
pub const ENCODER_PREFERENCE: [&str; 2] = ["libx264", "mpeg4"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl StreamInfo {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 1e-6 { fps } else { FALLBACK_FPS };
        Self { width, height, fps }
    }
}

/// Frames in strictly increasing time order, fixed size for the whole stream.
pub trait FrameSource {
    fn info(&self) -> StreamInfo;

    /// `Ok(None)` signals end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VideoError>;
}

/// Destination for rendered frames. Frames whose size differs from the sink
/// are resized before writing, never rejected.
pub trait VideoSink {
    fn size(&self) -> (u32, u32);

    fn write(&mut self, frame: &RgbImage) -> Result<(), VideoError>;

    /// Releases the encode handle. Further writes fail.
    fn close(&mut self) -> Result<(), VideoError>;
}

/// Nearest-neighbour resize to `width`x`height`, borrowing when already matching.
pub fn fit_frame(frame: &RgbImage, width: u32, height: u32) -> Cow<'_, RgbImage> {
    if frame.dimensions() == (width, height) {
        Cow::Borrowed(frame)
    } else {
        Cow::Owned(imageops::resize(frame, width, height, FilterType::Nearest))
    }
}

fn ensure_ffmpeg(tool: &str) -> Result<(), VideoError> {
    Command::new(tool)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|_| ())
        .map_err(|e| VideoError::FfmpegMissing(format!("{tool}: {e}")))
}

/// Reads width, height and frame rate of the first video stream.
pub fn probe(path: impl AsRef<Path>) -> Result<StreamInfo, VideoError> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(VideoError::NotFound(path.to_path_buf()));
    }

    // Check if ffprobe is available
    ensure_ffmpeg("ffprobe")?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate",
            "-of",
            "csv=p=0",
        ])
        .arg(path)
        .output()?;

    if !output.status.success() {
        return Err(VideoError::Probe(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    parse_probe_line(&String::from_utf8_lossy(&output.stdout))
}

fn parse_probe_line(info: &str) -> Result<StreamInfo, VideoError> {
    let line = info.lines().next().unwrap_or("").trim();
    let parts: Vec<&str> = line.split(',').collect();

    if parts.len() < 3 {
        return Err(VideoError::Probe(format!("unexpected ffprobe output '{line}'")));
    }

    let width: u32 = parts[0]
        .parse()
        .map_err(|_| VideoError::Probe(format!("invalid width '{}'", parts[0])))?;
    let height: u32 = parts[1]
        .parse()
        .map_err(|_| VideoError::Probe(format!("invalid height '{}'", parts[1])))?;
    if width == 0 || height == 0 {
        return Err(VideoError::Probe(format!("invalid frame size {width}x{height}")));
    }

    let fps_str = parts[2];
    let fps = match fps_str.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(0.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => fps_str.parse().unwrap_or(0.0),
    };

    Ok(StreamInfo::new(width, height, fps))
}

/// Decodes a video file to raw RGB frames through `ffmpeg`.
pub struct FfmpegSource {
    path: PathBuf,
    info: StreamInfo,
    child: Child,
    stdout: ChildStdout,
    frames_read: u64,
}

impl FfmpegSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VideoError> {
        let path = path.as_ref().to_path_buf();
        let info = probe(&path)?;

        ensure_ffmpeg("ffmpeg")?;

        let mut child = Command::new("ffmpeg")
            .args(decoder_args(&path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(VideoError::Probe("decoder stdout unavailable".into()));
        };

        info!(
            "Opened {} ({}x{} @ {:.2} fps)",
            path.display(),
            info.width,
            info.height,
            info.fps
        );

        Ok(Self {
            path,
            info,
            child,
            stdout,
            frames_read: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decoder arguments. Rotation metadata is ignored so frames keep the stored
/// size reported by ffprobe.
fn decoder_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-v", "error", "-nostdin", "-noautorotate", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_os_string());
    args.extend(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"].into_iter().map(OsString::from));
    args
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
        let frame_len = self.info.width as usize * self.info.height as usize * 3;
        let mut buf = vec![0u8; frame_len];
        let filled = read_full(&mut self.stdout, &mut buf)?;

        if filled == 0 {
            return Ok(None);
        }
        if filled < frame_len {
            warn!(
                "Truncated frame {} ({} of {} bytes), treating as end of stream",
                self.frames_read + 1,
                filled,
                frame_len
            );
            return Ok(None);
        }

        self.frames_read += 1;
        Ok(RgbImage::from_raw(self.info.width, self.info.height, buf))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        debug!("Released decoder for {} after {} frames", self.path.display(), self.frames_read);
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Encodes raw RGB frames to a video file through `ffmpeg`.
pub struct FfmpegSink {
    path: PathBuf,
    width: u32,
    height: u32,
    encoder: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    frames_written: u64,
}

impl FfmpegSink {
    /// Opens the encoder, falling back once to the next entry of
    /// [`ENCODER_PREFERENCE`] when the preferred one is missing or fails a
    /// one-frame trial encode. The destination is not touched until an encoder
    /// has passed.
    pub fn open(path: impl AsRef<Path>, width: u32, height: u32, fps: f64) -> Result<Self, VideoError> {
        let path = path.as_ref().to_path_buf();

        ensure_ffmpeg("ffmpeg")?;

        let fps = StreamInfo::new(width, height, fps).fps;
        let encoder = select_encoder(&available_encoders()?, |encoder| {
            trial_encode(&path, encoder, width, height)
        })?;

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-v", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-s")
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(format!("{fps}"))
            .args(["-i", "-"])
            .args(["-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2"])
            .args(["-c:v", encoder]);
        if encoder == "libx264" {
            cmd.args(["-preset", "medium", "-crf", "23"]);
        }
        cmd.args(["-pix_fmt", "yuv420p"])
            .arg(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null());

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take();

        info!("Writing {} ({}x{} @ {:.2} fps, {})", path.display(), width, height, fps, encoder);

        Ok(Self {
            path,
            width,
            height,
            encoder: encoder.to_string(),
            child: Some(child),
            stdin,
            frames_written: 0,
        })
    }

    pub fn encoder(&self) -> &str {
        &self.encoder
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn finish(&mut self) -> Result<(), VideoError> {
        // Closing stdin lets ffmpeg flush and finalize the container
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let status = child.wait()?;
            if !status.success() {
                return Err(VideoError::EncodeFailed(status.to_string()));
            }
        }
        Ok(())
    }
}

fn available_encoders() -> Result<String, VideoError> {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn encoder_listed(listing: &str, name: &str) -> bool {
    listing
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(name))
}

/// First listed encoder whose trial succeeds.
fn select_encoder(
    listing: &str,
    mut trial: impl FnMut(&str) -> Result<(), String>,
) -> Result<&'static str, VideoError> {
    let mut last_failure = None;

    for (i, encoder) in ENCODER_PREFERENCE.iter().enumerate() {
        if !encoder_listed(listing, encoder) {
            debug!("Encoder {} not available", encoder);
            continue;
        }
        match trial(encoder) {
            Ok(()) => {
                if i > 0 {
                    warn!("Falling back to encoder {}", encoder);
                }
                return Ok(*encoder);
            }
            Err(message) => {
                warn!("Encoder {} failed to start: {}", encoder, message);
                last_failure = Some(message);
            }
        }
    }

    Err(match last_failure {
        Some(message) => VideoError::EncodeFailed(message),
        None => VideoError::NoEncoder(ENCODER_PREFERENCE.iter().map(|s| s.to_string()).collect()),
    })
}

/// Encodes one black frame into a scratch file beside `path`, with the same
/// extension so ffmpeg picks the same container.
fn trial_encode(path: &Path, encoder: &str, width: u32, height: u32) -> Result<(), String> {
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned()).unwrap_or_default();
    let scratch = path.with_file_name(format!(".betagen_trial_{}.{}", Uuid::new_v4().simple(), ext));

    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-v", "error", "-y", "-f", "lavfi", "-i"])
        .arg(format!("color=c=black:s={width}x{height}:r=1"))
        .args(["-frames:v", "1", "-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2"])
        .args(["-c:v", encoder, "-pix_fmt", "yuv420p"])
        .arg(&scratch)
        .stdin(Stdio::null())
        .output();
    let _ = std::fs::remove_file(&scratch);

    match output {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            Err(if stderr.is_empty() { out.status.to_string() } else { stderr })
        }
        Err(e) => Err(e.to_string()),
    }
}

impl VideoSink for FfmpegSink {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn write(&mut self, frame: &RgbImage) -> Result<(), VideoError> {
        let frame = fit_frame(frame, self.width, self.height);
        let stdin = self.stdin.as_mut().ok_or(VideoError::Closed)?;

        if let Err(e) = stdin.write_all(frame.as_raw()) {
            // A broken pipe means the encoder died; report its exit status instead
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                self.finish()?;
            }
            return Err(e.into());
        }

        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), VideoError> {
        self.finish()?;
        debug!("Closed {} after {} frames", self.path.display(), self.frames_written);
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.child.is_some() {
            if let Err(e) = self.finish() {
                warn!("Encoder for {} did not finish cleanly: {}", self.path.display(), e);
            }
        }
    }
}

/// In-memory frame source, mostly for tests and embedding.
pub struct MemorySource {
    info: StreamInfo,
    frames: VecDeque<RgbImage>,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbImage>, fps: f64) -> Self {
        let (width, height) = frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
        Self {
            info: StreamInfo::new(width, height, fps),
            frames: frames.into(),
        }
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
        Ok(self.frames.pop_front())
    }
}

/// In-memory sink that keeps every written frame.
#[derive(Debug)]
pub struct MemorySink {
    info: StreamInfo,
    frames: Vec<RgbImage>,
    closed: bool,
}

impl MemorySink {
    pub fn open(width: u32, height: u32, fps: f64) -> Self {
        Self {
            info: StreamInfo::new(width, height, fps),
            frames: Vec::new(),
            closed: false,
        }
    }

    pub fn frames(&self) -> &[RgbImage] {
        &self.frames
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn into_frames(self) -> Vec<RgbImage> {
        self.frames
    }
}

impl VideoSink for MemorySink {
    fn size(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    fn write(&mut self, frame: &RgbImage) -> Result<(), VideoError> {
        if self.closed {
            return Err(VideoError::Closed);
        }
        let fitted = fit_frame(frame, self.info.width, self.info.height).into_owned();
        self.frames.push(fitted);
        Ok(())
    }

    fn close(&mut self) -> Result<(), VideoError> {
        self.closed = true;
        Ok(())
    }
}
