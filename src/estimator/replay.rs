// src/estimator/replay.rs - Pose backend serving detections recorded in a keypoints JSON file
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::{debug, info};

use super::PoseEstimator;
use crate::data::{FramePoseRecord, KeypointsPayload};
use crate::error::EstimatorError;
use crate::landmarks::{landmark_index, Landmark, LandmarkSet, POSE_LANDMARK_COUNT};

/// Serves detections recorded earlier in the keypoints JSON format.
///
/// Keypoints missing from a record come back with zero confidence, so the
/// renderer leaves them out.
pub struct ReplayEstimator {
    path: PathBuf,
    frames: HashMap<u64, LandmarkSet>,
    available: bool,
}

impl ReplayEstimator {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EstimatorError> {
        let path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&path)?;
        let payload: KeypointsPayload = serde_json::from_str(&content)?;
        let estimator = Self::from_payload(&path, &payload);

        info!(
            "Replay backend loaded {} detections from {} (model {})",
            estimator.frames.len(),
            path.display(),
            payload.model
        );
        Ok(estimator)
    }

    pub fn from_payload(path: impl AsRef<Path>, payload: &KeypointsPayload) -> Self {
        let frames = payload
            .frames
            .iter()
            .map(|record| (record.frame_index, record_to_landmarks(record)))
            .collect();

        Self {
            path: path.as_ref().to_path_buf(),
            frames,
            available: true,
        }
    }

    /// Placeholder for a file that could not be loaded.
    pub fn unavailable(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            frames: HashMap::new(),
            available: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn record_to_landmarks(record: &FramePoseRecord) -> LandmarkSet {
    let mut landmarks = vec![Landmark::new(0.0, 0.0, 0.0); POSE_LANDMARK_COUNT];
    for kp in &record.keypoints {
        match landmark_index(&kp.name) {
            Some(idx) => landmarks[idx] = Landmark::new(kp.x, kp.y, kp.confidence),
            None => debug!("Frame {}: ignoring unknown keypoint '{}'", record.frame_index, kp.name),
        }
    }
    LandmarkSet::new(landmarks)
}

impl PoseEstimator for ReplayEstimator {
    fn name(&self) -> &str {
        "replay"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn infer(&mut self, frame_index: u64, _frame: &RgbImage) -> Result<Option<LandmarkSet>, EstimatorError> {
        if !self.available {
            return Err(EstimatorError::Unavailable);
        }
        Ok(self.frames.get(&frame_index).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PoseKeypoint;

    fn payload() -> KeypointsPayload {
        KeypointsPayload {
            video_id: "clip".into(),
            model: "mediapipe".into(),
            frames: vec![FramePoseRecord {
                frame_index: 4,
                keypoints: vec![
                    PoseKeypoint {
                        name: "left_wrist".into(),
                        x: 120.0,
                        y: 80.0,
                        confidence: 0.9,
                    },
                    PoseKeypoint {
                        name: "0".into(),
                        x: 60.0,
                        y: 20.0,
                        confidence: 1.4,
                    },
                    PoseKeypoint {
                        name: "tail".into(),
                        x: 1.0,
                        y: 1.0,
                        confidence: 1.0,
                    },
                ],
                confidence: 0.9,
                bbox: None,
            }],
            meta: Default::default(),
        }
    }

    #[test]
    fn test_replay_returns_recorded_frames_only() {
        let mut replay = ReplayEstimator::from_payload("poses.json", &payload());
        let frame = RgbImage::new(4, 4);

        assert!(replay.is_available());
        assert!(replay.infer(3, &frame).unwrap().is_none());

        let set = replay.infer(4, &frame).unwrap().unwrap();
        assert_eq!(set.len(), POSE_LANDMARK_COUNT);
        assert_eq!(set[15].position.x, 120.0);
        assert_eq!(set[15].confidence, 0.9);
        // Clamped at ingestion
        assert_eq!(set[0].confidence, 1.0);
        assert_eq!(set[1].confidence, 0.0);
    }

    #[test]
    fn test_unavailable_replay_errors() {
        let mut replay = ReplayEstimator::unavailable("missing.json");
        assert!(!replay.is_available());
        assert!(replay.infer(1, &RgbImage::new(1, 1)).is_err());
    }
}
