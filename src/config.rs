// src/config.rs
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::overlay::OverlayStyle;

const CONFIG_FILE_NAME: &str = "config.json";

/// What to do when the pose backend cannot run at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// Write frames through without any overlay.
    Passthrough,
    /// Substitute a motion-based silhouette estimate.
    #[default]
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    #[default]
    None,
    /// Precomputed keypoints JSON, looked up by frame index.
    Replay { path: PathBuf },
    /// Helper process speaking line-delimited JSON over stdio.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputResolution {
    Original,
    Fixed { width: u32, height: u32 },
}

impl OutputResolution {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("original") {
            return Ok(Self::Original);
        }
        let invalid = || ConfigError::InvalidResolution(text.to_string());
        let (w, h) = text.split_once(|c: char| c == 'x' || c == 'X').ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self::Fixed { width, height })
    }

    /// Output size for a stream of the given input size.
    pub fn resolve(&self, width: u32, height: u32) -> (u32, u32) {
        match *self {
            Self::Original => (width, height),
            Self::Fixed { width, height } => (width, height),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run inference every N frames; reuse the held detection otherwise.
    pub every_n: i64,
    /// EMA weight of the history, in [0, 1]. Higher is smoother.
    pub alpha: f64,
    pub min_visibility: f64,
    /// Stop after this many frames (0 = all).
    pub max_frames: u64,
    pub display: bool,
    /// "original" or WIDTHxHEIGHT.
    pub output_resolution: String,
    pub fallback: FallbackMode,
    pub backend: BackendConfig,
    /// Save every k-th rendered frame as JPEG (0 = off).
    pub dump_every: u64,
    pub dump_dir: PathBuf,
    pub keypoints_json: Option<PathBuf>,
    pub tracking_csv: Option<PathBuf>,
    pub video_id: Option<String>,
    pub marker_radius: i64,
    pub edge_thickness: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            every_n: 1,
            alpha: 0.7,
            min_visibility: 0.2,
            max_frames: 0,
            display: false,
            output_resolution: "original".to_string(),
            fallback: FallbackMode::default(),
            backend: BackendConfig::default(),
            dump_every: 0,
            dump_dir: PathBuf::from("debug_frames"),
            keypoints_json: None,
            tracking_csv: None,
            video_id: None,
            marker_radius: 3,
            edge_thickness: 2,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Explicit file if given, else `config.json` in the platform config
    /// directory when present, else defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => {
                debug!("Loading config from {}", path.display());
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.every_n < 1 {
            return Err(ConfigError::InvalidStride(self.every_n));
        }
        if !self.alpha.is_finite() || !(0.0..=1.0).contains(&self.alpha) {
            return Err(ConfigError::InvalidAlpha(self.alpha));
        }
        if !self.min_visibility.is_finite() || !(0.0..=1.0).contains(&self.min_visibility) {
            return Err(ConfigError::InvalidMinVisibility(self.min_visibility));
        }
        OutputResolution::parse(&self.output_resolution)?;
        self.overlay_style().validate()?;
        if let BackendConfig::Command { program, .. } = &self.backend {
            if program.trim().is_empty() {
                return Err(ConfigError::Invalid("backend command is empty".into()));
            }
        }
        Ok(())
    }

    /// Stride as used by the scheduler. Call after `validate`.
    pub fn stride(&self) -> u32 {
        u32::try_from(self.every_n.max(1)).unwrap_or(u32::MAX)
    }

    pub fn max_frames(&self) -> Option<u64> {
        (self.max_frames > 0).then_some(self.max_frames)
    }

    pub fn resolution(&self) -> Result<OutputResolution, ConfigError> {
        OutputResolution::parse(&self.output_resolution)
    }

    pub fn overlay_style(&self) -> OverlayStyle {
        OverlayStyle {
            marker_radius: self.marker_radius,
            edge_thickness: self.edge_thickness,
            ..OverlayStyle::default()
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "betagen", "betagen_pose")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
