//! Pose-skeleton overlays for climbing videos.
//!
//! Frames flow from a [`video::FrameSource`] through the
//! [`pipeline::PipelineDriver`], which runs the pose backend every N frames,
//! holds the last detection in between, smooths it over time and draws the
//! skeleton before handing the frame to a [`video::VideoSink`].

pub mod config;
pub mod data;
pub mod error;
pub mod estimator;
pub mod landmarks;
pub mod overlay;
pub mod pipeline;
pub mod preview;
pub mod tracking;
pub mod video;

pub use config::{BackendConfig, FallbackMode, OutputResolution, PipelineConfig};
pub use error::{ConfigError, EstimatorError, ExportError, PipelineError, VideoError};
pub use landmarks::{Landmark, LandmarkSet, SkeletonTopology};
pub use pipeline::{DriverSettings, PipelineDriver, RunSummary};
