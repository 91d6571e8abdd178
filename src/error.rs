// src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Rejected startup configuration. Values are never clamped mid-run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--every-n must be at least 1 (got {0})")]
    InvalidStride(i64),

    #[error("--alpha must lie in [0, 1] (got {0})")]
    InvalidAlpha(f64),

    #[error("--min-visibility must lie in [0, 1] (got {0})")]
    InvalidMinVisibility(f64),

    #[error("invalid output resolution '{0}', expected 'original' or WIDTHxHEIGHT")]
    InvalidResolution(String),

    #[error("skeleton edge ({a}, {b}) references a landmark outside 0..{count}")]
    InvalidEdge { a: usize, b: usize, count: usize },

    #[error("landmark count must be positive")]
    EmptyLandmarkSet,

    #[error("{0}")]
    Invalid(String),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("video file does not exist: {0}")]
    NotFound(PathBuf),

    #[error("FFmpeg is not installed or not in PATH ({0})")]
    FfmpegMissing(String),

    #[error("ffprobe could not read stream info: {0}")]
    Probe(String),

    #[error("no usable video encoder among {0:?}")]
    NoEncoder(Vec<String>),

    #[error("encoder failed: {0}")]
    EncodeFailed(String),

    #[error("sink is already closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("pose backend is not available")]
    Unavailable,

    #[error("backend returned {got} landmarks, expected {expected}")]
    LandmarkCount { expected: usize, got: usize },

    #[error("malformed backend reply: {0}")]
    Protocol(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("preview window: {0}")]
    Preview(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Everything that can end a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot open input {path}: {source}")]
    OpenInput {
        path: PathBuf,
        #[source]
        source: VideoError,
    },

    #[error("cannot open output {path}: {source}")]
    OpenOutput {
        path: PathBuf,
        #[source]
        source: VideoError,
    },

    #[error(transparent)]
    Video(#[from] VideoError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

impl PipelineError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::OpenInput { .. } => 2,
            PipelineError::OpenOutput { .. } => 3,
            PipelineError::Config(_) => 4,
            PipelineError::Video(_) | PipelineError::Export(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failures_have_distinct_exit_codes() {
        let input = PipelineError::OpenInput {
            path: PathBuf::from("in.mp4"),
            source: VideoError::NotFound(PathBuf::from("in.mp4")),
        };
        let output = PipelineError::OpenOutput {
            path: PathBuf::from("out.mp4"),
            source: VideoError::NoEncoder(vec!["libx264".into()]),
        };
        let config = PipelineError::from(ConfigError::InvalidStride(0));

        assert_eq!(input.exit_code(), 2);
        assert_eq!(output.exit_code(), 3);
        assert_eq!(config.exit_code(), 4);
        assert_eq!(PipelineError::from(VideoError::Closed).exit_code(), 1);
    }
}
