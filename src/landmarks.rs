// src/landmarks.rs
use nalgebra::Point2;
use once_cell::sync::Lazy;

use crate::error::ConfigError;

/// Number of landmarks in the MediaPipe full-body layout.
pub const POSE_LANDMARK_COUNT: usize = 33;

/// MediaPipe pose landmark names, in index order.
pub const POSE_LANDMARK_NAMES: [&str; POSE_LANDMARK_COUNT] = [
    "nose",
    "left_eye_inner",
    "left_eye",
    "left_eye_outer",
    "right_eye_inner",
    "right_eye",
    "right_eye_outer",
    "left_ear",
    "right_ear",
    "mouth_left",
    "mouth_right",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_pinky",
    "right_pinky",
    "left_index",
    "right_index",
    "left_thumb",
    "right_thumb",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
    "left_heel",
    "right_heel",
    "left_foot_index",
    "right_foot_index",
];

/// MediaPipe pose connections (35 edges).
pub const POSE_CONNECTIONS: [(usize, usize); 35] = [
    // Face
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (0, 4),
    (4, 5),
    (5, 6),
    (6, 8),
    (9, 10),
    // Arms and hands
    (11, 12),
    (11, 13),
    (13, 15),
    (15, 17),
    (15, 19),
    (15, 21),
    (17, 19),
    (12, 14),
    (14, 16),
    (16, 18),
    (16, 20),
    (16, 22),
    (18, 20),
    // Torso
    (11, 23),
    (12, 24),
    (23, 24),
    // Legs and feet
    (23, 25),
    (24, 26),
    (25, 27),
    (26, 28),
    (27, 29),
    (28, 30),
    (29, 31),
    (30, 32),
    (27, 31),
    (28, 32),
];

/// Full-body topology shared read-only by every run.
pub static FULL_BODY_TOPOLOGY: Lazy<SkeletonTopology> = Lazy::new(|| SkeletonTopology {
    edges: POSE_CONNECTIONS.to_vec(),
    landmark_count: POSE_LANDMARK_COUNT,
});

/// Index of a landmark name, also accepting plain numeric names ("0".."32").
pub fn landmark_index(name: &str) -> Option<usize> {
    if let Some(idx) = POSE_LANDMARK_NAMES.iter().position(|n| *n == name) {
        return Some(idx);
    }
    name.trim()
        .parse::<usize>()
        .ok()
        .filter(|idx| *idx < POSE_LANDMARK_COUNT)
}

/// Display name for a landmark index.
pub fn landmark_name(index: usize) -> String {
    POSE_LANDMARK_NAMES
        .get(index)
        .map(|n| n.to_string())
        .unwrap_or_else(|| index.to_string())
}

/// A tracked body keypoint in pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    /// Pixel coordinates; may lie outside the frame.
    pub position: Point2<f64>,
    /// Detection confidence, always within [0, 1].
    pub confidence: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, confidence: f64) -> Self {
        Self {
            position: Point2::new(x, y),
            confidence: clamp_confidence(confidence),
        }
    }

    pub fn is_visible(&self, min_visibility: f64) -> bool {
        self.confidence >= min_visibility
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Fixed-length ordered landmarks for one detected person.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    landmarks: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(landmarks: Vec<Landmark>) -> Self {
        // Landmark::new already clamps, but struct literals bypass it
        let landmarks = landmarks
            .into_iter()
            .map(|lm| Landmark {
                position: lm.position,
                confidence: clamp_confidence(lm.confidence),
            })
            .collect();
        Self { landmarks }
    }

    /// Every landmark at the same position and confidence.
    pub fn uniform(count: usize, x: f64, y: f64, confidence: f64) -> Self {
        Self::new(vec![Landmark::new(x, y, confidence); count])
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.landmarks.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Landmark> {
        self.landmarks.iter()
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [Landmark] {
        &mut self.landmarks
    }

    pub fn average_confidence(&self) -> f64 {
        if self.landmarks.is_empty() {
            return 0.0;
        }
        self.landmarks.iter().map(|lm| lm.confidence).sum::<f64>() / self.landmarks.len() as f64
    }

    /// `[x_min, y_min, x_max, y_max]` over landmarks at or above the threshold.
    pub fn bounding_box(&self, min_visibility: f64) -> Option<[f64; 4]> {
        let mut visible = self
            .landmarks
            .iter()
            .filter(|lm| lm.is_visible(min_visibility) && lm.position.x.is_finite() && lm.position.y.is_finite());
        let first = visible.next()?;
        let mut bbox = [first.position.x, first.position.y, first.position.x, first.position.y];
        for lm in visible {
            bbox[0] = bbox[0].min(lm.position.x);
            bbox[1] = bbox[1].min(lm.position.y);
            bbox[2] = bbox[2].max(lm.position.x);
            bbox[3] = bbox[3].max(lm.position.y);
        }
        Some(bbox)
    }
}

impl std::ops::Index<usize> for LandmarkSet {
    type Output = Landmark;

    fn index(&self, index: usize) -> &Landmark {
        &self.landmarks[index]
    }
}

impl<'a> IntoIterator for &'a LandmarkSet {
    type Item = &'a Landmark;
    type IntoIter = std::slice::Iter<'a, Landmark>;

    fn into_iter(self) -> Self::IntoIter {
        self.landmarks.iter()
    }
}

/// Which landmark pairs are joined by a drawn edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkeletonTopology {
    edges: Vec<(usize, usize)>,
    landmark_count: usize,
}

impl SkeletonTopology {
    pub fn new(edges: Vec<(usize, usize)>, landmark_count: usize) -> Result<Self, ConfigError> {
        if landmark_count == 0 {
            return Err(ConfigError::EmptyLandmarkSet);
        }
        if let Some(&(a, b)) = edges
            .iter()
            .find(|(a, b)| *a >= landmark_count || *b >= landmark_count)
        {
            return Err(ConfigError::InvalidEdge {
                a,
                b,
                count: landmark_count,
            });
        }
        Ok(Self {
            edges,
            landmark_count,
        })
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn landmark_count(&self) -> usize {
        self.landmark_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped_at_ingestion() {
        assert_eq!(Landmark::new(0.0, 0.0, 1.7).confidence, 1.0);
        assert_eq!(Landmark::new(0.0, 0.0, -0.2).confidence, 0.0);
        assert_eq!(Landmark::new(0.0, 0.0, f64::NAN).confidence, 0.0);

        let raw = Landmark {
            position: Point2::new(1.0, 2.0),
            confidence: 3.0,
        };
        let set = LandmarkSet::new(vec![raw]);
        assert_eq!(set[0].confidence, 1.0);
        assert_eq!(set[0].position, Point2::new(1.0, 2.0));
    }

    #[test]
    fn test_positions_may_leave_the_frame() {
        let lm = Landmark::new(-40.0, 1e6, 0.5);
        assert_eq!(lm.position.x, -40.0);
        assert_eq!(lm.position.y, 1e6);
    }

    #[test]
    fn test_full_body_topology_is_valid() {
        let topo = &*FULL_BODY_TOPOLOGY;
        assert_eq!(topo.landmark_count(), POSE_LANDMARK_COUNT);
        assert_eq!(topo.edges().len(), 35);
        assert!(SkeletonTopology::new(topo.edges().to_vec(), POSE_LANDMARK_COUNT).is_ok());
    }

    #[test]
    fn test_topology_rejects_out_of_range_edge() {
        let err = SkeletonTopology::new(vec![(0, 1), (2, 5)], 5).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEdge { a: 2, b: 5, count: 5 }));
    }

    #[test]
    fn test_landmark_index_accepts_names_and_numbers() {
        assert_eq!(landmark_index("nose"), Some(0));
        assert_eq!(landmark_index("right_foot_index"), Some(32));
        assert_eq!(landmark_index("15"), Some(15));
        assert_eq!(landmark_index("33"), None);
        assert_eq!(landmark_index("tail"), None);
        assert_eq!(landmark_name(11), "left_shoulder");
    }

    #[test]
    fn test_bounding_box_ignores_low_confidence() {
        let set = LandmarkSet::new(vec![
            Landmark::new(10.0, 20.0, 0.9),
            Landmark::new(30.0, 5.0, 0.8),
            Landmark::new(500.0, 500.0, 0.1),
        ]);
        assert_eq!(set.bounding_box(0.5), Some([10.0, 5.0, 30.0, 20.0]));
        assert_eq!(set.bounding_box(0.95), None);
        assert!((set.average_confidence() - 0.6).abs() < 1e-12);
    }
}
