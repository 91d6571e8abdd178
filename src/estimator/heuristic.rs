// src/estimator/heuristic.rs - Motion-based stand-in used when no real pose backend is available
use image::RgbImage;

use super::PoseEstimator;
use crate::error::EstimatorError;
use crate::landmarks::{Landmark, LandmarkSet, POSE_LANDMARK_COUNT};

/// Confidence given to every placed landmark.
pub const HEURISTIC_CONFIDENCE: f64 = 0.5;

/// Upright figure in bounding-box units, indexed like `POSE_LANDMARK_NAMES`.
const STANDING_TEMPLATE: [(f64, f64); POSE_LANDMARK_COUNT] = [
    (0.50, 0.08), // nose
    (0.52, 0.06),
    (0.53, 0.06),
    (0.54, 0.06),
    (0.48, 0.06),
    (0.47, 0.06),
    (0.46, 0.06),
    (0.56, 0.07),
    (0.44, 0.07),
    (0.52, 0.11),
    (0.48, 0.11),
    (0.65, 0.20), // shoulders
    (0.35, 0.20),
    (0.72, 0.35),
    (0.28, 0.35),
    (0.75, 0.48), // wrists
    (0.25, 0.48),
    (0.76, 0.51),
    (0.24, 0.51),
    (0.75, 0.52),
    (0.25, 0.52),
    (0.73, 0.50),
    (0.27, 0.50),
    (0.60, 0.52), // hips
    (0.40, 0.52),
    (0.62, 0.72),
    (0.38, 0.72),
    (0.63, 0.92), // ankles
    (0.37, 0.92),
    (0.62, 0.95),
    (0.38, 0.95),
    (0.66, 0.97),
    (0.34, 0.97),
];

/// Region of the frame that changed since the previous call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Guesses a pose by fitting a standing template into the region that moved
/// between consecutive inferred frames.
///
/// The first frame, and any frame after a size change, only primes the
/// detector and returns no detection.
pub struct MotionHeuristicEstimator {
    previous: Option<RgbImage>,
    pixel_diff_threshold: u8,
    min_changed_fraction: f64,
}

impl Default for MotionHeuristicEstimator {
    fn default() -> Self {
        Self::new(0.002)
    }
}

impl MotionHeuristicEstimator {
    /// `min_changed_fraction` is the share of pixels (0.0-1.0) that must
    /// change before anything is reported.
    pub fn new(min_changed_fraction: f64) -> Self {
        Self {
            previous: None,
            pixel_diff_threshold: 25,
            min_changed_fraction,
        }
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Compares against the stored frame and remembers `frame` for next time.
    pub fn detect_motion(&mut self, frame: &RgbImage) -> Option<MotionBox> {
        let motion = match &self.previous {
            Some(prev) if prev.dimensions() == frame.dimensions() => self.changed_region(prev, frame),
            _ => None,
        };
        self.previous = Some(frame.clone());
        motion
    }

    fn changed_region(&self, previous: &RgbImage, current: &RgbImage) -> Option<MotionBox> {
        let (width, height) = current.dimensions();
        let mut changed = 0u64;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0, 0);

        for (x, y, pixel) in current.enumerate_pixels() {
            let before = previous.get_pixel(x, y);
            let moved = pixel
                .0
                .iter()
                .zip(before.0.iter())
                .any(|(a, b)| a.abs_diff(*b) > self.pixel_diff_threshold);
            if moved {
                changed += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }

        let total = u64::from(width) * u64::from(height);
        if changed == 0 || total == 0 || (changed as f64 / total as f64) < self.min_changed_fraction {
            return None;
        }

        Some(MotionBox {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        })
    }
}

/// Places the standing template inside `region`.
pub fn fit_template(region: MotionBox) -> LandmarkSet {
    let (x, y) = (f64::from(region.x), f64::from(region.y));
    let (w, h) = (f64::from(region.width), f64::from(region.height));
    LandmarkSet::new(
        STANDING_TEMPLATE
            .iter()
            .map(|&(u, v)| Landmark::new(x + u * w, y + v * h, HEURISTIC_CONFIDENCE))
            .collect(),
    )
}

impl PoseEstimator for MotionHeuristicEstimator {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn infer(&mut self, _frame_index: u64, frame: &RgbImage) -> Result<Option<LandmarkSet>, EstimatorError> {
        Ok(self.detect_motion(frame).map(fit_template))
    }
}
