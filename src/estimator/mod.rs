// src/estimator/mod.rs - Pose backends behind a narrow contract
pub mod command;
pub mod heuristic;
pub mod replay;

use image::RgbImage;
use tracing::debug;

use crate::config::BackendConfig;
use crate::error::EstimatorError;
use crate::landmarks::LandmarkSet;

pub use command::CommandEstimator;
pub use heuristic::MotionHeuristicEstimator;
pub use replay::ReplayEstimator;

/// External pose detection capability.
pub trait PoseEstimator {
    /// Short backend name for logs and exports.
    fn name(&self) -> &str;

    /// Whether the backend initialized. Queried once when a run starts.
    fn is_available(&self) -> bool;

    /// Landmarks in pixel space, or `None` when nobody was detected.
    fn infer(&mut self, frame_index: u64, frame: &RgbImage) -> Result<Option<LandmarkSet>, EstimatorError>;
}

/// Backend that never initializes; exercises the degraded path.
#[derive(Debug, Default)]
pub struct NoBackend;

impl PoseEstimator for NoBackend {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn infer(&mut self, _frame_index: u64, _frame: &RgbImage) -> Result<Option<LandmarkSet>, EstimatorError> {
        Err(EstimatorError::Unavailable)
    }
}

/// Builds the configured backend. Construction failures are logged and
/// surface later as `is_available() == false`, never as a hard error.
pub fn from_config(backend: &BackendConfig) -> Box<dyn PoseEstimator> {
    match backend {
        BackendConfig::None => Box::new(NoBackend),
        BackendConfig::Replay { path } => match ReplayEstimator::load(path) {
            Ok(replay) => Box::new(replay),
            Err(e) => {
                debug!("Replay backend failed to load {}: {}", path.display(), e);
                Box::new(ReplayEstimator::unavailable(path))
            }
        },
        BackendConfig::Command { program, args } => Box::new(CommandEstimator::spawn(program, args)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_backend_is_unavailable() {
        let mut backend = NoBackend;
        assert!(!backend.is_available());
        assert!(matches!(
            backend.infer(1, &RgbImage::new(2, 2)),
            Err(EstimatorError::Unavailable)
        ));
    }

    #[test]
    fn test_broken_replay_file_degrades_instead_of_failing() {
        let backend = from_config(&BackendConfig::Replay {
            path: "/no/such/poses.json".into(),
        });
        assert_eq!(backend.name(), "replay");
        assert!(!backend.is_available());
    }
}
