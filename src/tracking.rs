// src/tracking.rs - Inference scheduling, hold-last detection cache and EMA smoothing
use crate::error::ConfigError;
use crate::landmarks::LandmarkSet;

/// True when frame `frame_index` (1-based) should get fresh inference.
pub fn should_infer(frame_index: u64, stride: u32) -> bool {
    stride <= 1 || frame_index % u64::from(stride) == 0
}

/// Decides invoke-vs-reuse for each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferenceScheduler {
    stride: u32,
}

impl InferenceScheduler {
    pub fn new(stride: u32) -> Self {
        Self { stride }
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn should_infer(&self, frame_index: u64) -> bool {
        should_infer(frame_index, self.stride)
    }
}

/// Holds the last known detection. A miss never erases a prior pose.
#[derive(Debug, Default)]
pub struct DetectionCache {
    last_detection: Option<LandmarkSet>,
}

impl DetectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_inference_skipped(&mut self) {}

    /// Returns true when `result` replaced the held detection.
    pub fn on_inference_run(&mut self, result: Option<LandmarkSet>) -> bool {
        match result {
            Some(detection) => {
                self.last_detection = Some(detection);
                true
            }
            None => false,
        }
    }

    pub fn last_detection(&self) -> Option<&LandmarkSet> {
        self.last_detection.as_ref()
    }
}

/// Exponential moving average over landmark sequences.
///
/// `alpha` near 1 gives strong inertia (smooth, lagging), near 0 follows the
/// raw observation almost immediately. One instance per video stream.
#[derive(Debug)]
pub struct TemporalSmoother {
    alpha: f64,
    smoothed: Option<LandmarkSet>,
}

impl TemporalSmoother {
    pub fn new(alpha: f64) -> Result<Self, ConfigError> {
        if !alpha.is_finite() || !(0.0..=1.0).contains(&alpha) {
            return Err(ConfigError::InvalidAlpha(alpha));
        }
        Ok(Self {
            alpha,
            smoothed: None,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn state(&self) -> Option<&LandmarkSet> {
        self.smoothed.as_ref()
    }

    pub fn update(&mut self, observation: &LandmarkSet) -> &LandmarkSet {
        let alpha = self.alpha;
        if let Some(state) = self.smoothed.as_mut() {
            debug_assert_eq!(state.len(), observation.len());

            for (s, o) in state.as_mut_slice().iter_mut().zip(observation.iter()) {
                s.position.x = ema(s.position.x, o.position.x, alpha);
                s.position.y = ema(s.position.y, o.position.y, alpha);
                s.confidence = ema(s.confidence, o.confidence, alpha).clamp(0.0, 1.0);
            }
        } else {
            // No smoothing on the first sample
            self.smoothed = Some(observation.clone());
        }

        self.smoothed.get_or_insert_with(|| observation.clone())
    }

    pub fn reset(&mut self) {
        self.smoothed = None;
    }
}

// Equal inputs short-circuit so constant observations are an exact fixed point.
fn ema(previous: f64, observed: f64, alpha: f64) -> f64 {
    if previous == observed {
        previous
    } else {
        alpha * previous + (1.0 - alpha) * observed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{Landmark, POSE_LANDMARK_COUNT};

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_should_infer_every_frame_for_small_stride() {
        for i in 1..=20 {
            assert!(should_infer(i, 1));
            assert!(should_infer(i, 0));
        }
    }

    #[test]
    fn test_should_infer_positions_match_stride() {
        let hits: Vec<u64> = (1..=10).filter(|i| should_infer(*i, 3)).collect();
        assert_eq!(hits, vec![3, 6, 9]);

        let scheduler = InferenceScheduler::new(4);
        let hits: Vec<u64> = (1..=17).filter(|i| scheduler.should_infer(*i)).collect();
        assert_eq!(hits, vec![4, 8, 12, 16]);
    }

    #[test]
    fn test_cache_holds_last_on_miss() {
        let mut cache = DetectionCache::new();
        assert!(cache.last_detection().is_none());

        assert!(!cache.on_inference_run(None));
        assert!(cache.last_detection().is_none());

        let first = LandmarkSet::uniform(POSE_LANDMARK_COUNT, 10.0, 20.0, 0.8);
        assert!(cache.on_inference_run(Some(first.clone())));

        let before = cache.last_detection().cloned();
        assert!(!cache.on_inference_run(None));
        assert_eq!(cache.last_detection().cloned(), before);

        cache.on_inference_skipped();
        assert_eq!(cache.last_detection(), Some(&first));

        let second = LandmarkSet::uniform(POSE_LANDMARK_COUNT, 1.0, 2.0, 0.3);
        cache.on_inference_run(Some(second.clone()));
        assert_eq!(cache.last_detection(), Some(&second));
    }

    #[test]
    fn test_first_sample_passthrough() {
        let mut s = TemporalSmoother::new(0.9).unwrap();
        let obs = LandmarkSet::new(vec![Landmark::new(3.0, 4.0, 0.25), Landmark::new(-7.5, 1e4, 1.0)]);
        assert_eq!(s.update(&obs), &obs);
    }

    #[test]
    fn test_constant_input_is_fixed_point() {
        let obs = LandmarkSet::new(vec![
            Landmark::new(50.0, 50.0, 1.0),
            Landmark::new(0.1, 123.456, 0.3),
            Landmark::new(-12.7, 1e7, 0.7),
        ]);
        for alpha in [0.0, 0.1, 0.3, 0.5, 0.7, 0.9, 0.999, 1.0] {
            let mut s = TemporalSmoother::new(alpha).unwrap();
            for _ in 0..25 {
                assert_eq!(s.update(&obs), &obs, "alpha = {alpha}");
            }
        }
    }

    #[test]
    fn test_ema_blends_every_channel() {
        let mut s = TemporalSmoother::new(0.5).unwrap();
        s.update(&LandmarkSet::new(vec![Landmark::new(0.0, 0.0, 0.0)]));
        let out = s.update(&LandmarkSet::new(vec![Landmark::new(2.0, 4.0, 1.0)]));
        assert!(approx_eq(out[0].position.x, 1.0));
        assert!(approx_eq(out[0].position.y, 2.0));
        assert!(approx_eq(out[0].confidence, 0.5));
    }

    #[test]
    fn test_alpha_extremes() {
        let a = LandmarkSet::new(vec![Landmark::new(1.0, 2.0, 0.2)]);
        let b = LandmarkSet::new(vec![Landmark::new(9.0, 8.0, 0.9)]);

        // alpha = 1 never moves
        let mut inert = TemporalSmoother::new(1.0).unwrap();
        inert.update(&a);
        assert_eq!(inert.update(&b), &a);

        // alpha = 0 follows the observation
        let mut eager = TemporalSmoother::new(0.0).unwrap();
        eager.update(&a);
        assert_eq!(eager.update(&b), &b);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut s = TemporalSmoother::new(0.0).unwrap();
        s.update(&LandmarkSet::uniform(2, 1.0, 1.0, 1.0));
        s.reset();
        assert!(s.state().is_none());
        let fresh = LandmarkSet::uniform(2, 5.0, 6.0, 0.5);
        assert_eq!(s.update(&fresh), &fresh);
    }

    #[test]
    fn test_alpha_out_of_range_rejected() {
        assert!(matches!(TemporalSmoother::new(1.01), Err(ConfigError::InvalidAlpha(_))));
        assert!(matches!(TemporalSmoother::new(-0.1), Err(ConfigError::InvalidAlpha(_))));
        assert!(TemporalSmoother::new(f64::NAN).is_err());
    }
}
