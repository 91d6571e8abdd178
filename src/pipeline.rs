// src/pipeline.rs - Per-frame orchestration: schedule, detect, hold, smooth, draw
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::config::{FallbackMode, PipelineConfig};
use crate::error::{ConfigError, EstimatorError, ExportError, PipelineError};
use crate::estimator::{MotionHeuristicEstimator, PoseEstimator};
use crate::landmarks::{LandmarkSet, SkeletonTopology, FULL_BODY_TOPOLOGY};
use crate::overlay::{OverlayRenderer, OverlayStats, OverlayStyle};
use crate::tracking::{DetectionCache, InferenceScheduler, TemporalSmoother};
use crate::video::{FrameSource, VideoSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    AwaitingFirstDetection,
    Tracking,
    Drained,
}

/// Where the landmarks drawn on a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    /// Nothing detected yet; frame passed through.
    None,
    /// Inference ran on this frame and found a person.
    Fresh,
    /// Reused from an earlier frame.
    Held,
}

impl DetectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSource::None => "none",
            DetectionSource::Fresh => "fresh",
            DetectionSource::Held => "held",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameOutcome {
    /// 1-based frame index.
    pub index: u64,
    pub inferred: bool,
    pub detection: DetectionSource,
    pub smoothed: Option<LandmarkSet>,
    pub stats: OverlayStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// Sees every frame after rendering. Exporters and the preview window hang
/// off this.
pub trait FrameObserver {
    fn on_frame(&mut self, outcome: &FrameOutcome, frame: &RgbImage) -> Result<Control, ExportError>;

    /// Called once after the last frame.
    fn finish(&mut self) -> Result<(), ExportError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    EndOfStream,
    MaxFrames,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub inferences: u64,
    pub detections: u64,
    pub rendered: u64,
    pub passed_through: u64,
    pub degraded: bool,
    pub end: EndReason,
}

/// Validated knobs the driver runs with.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub stride: u32,
    pub alpha: f64,
    pub min_visibility: f64,
    pub max_frames: Option<u64>,
    pub style: OverlayStyle,
    pub topology: SkeletonTopology,
}

impl DriverSettings {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            stride: config.stride(),
            alpha: config.alpha,
            min_visibility: config.min_visibility,
            max_frames: config.max_frames(),
            style: config.overlay_style(),
            topology: FULL_BODY_TOPOLOGY.clone(),
        })
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            stride: 1,
            alpha: 0.7,
            min_visibility: 0.2,
            max_frames: None,
            style: OverlayStyle::default(),
            topology: FULL_BODY_TOPOLOGY.clone(),
        }
    }
}

pub struct PipelineDriver {
    settings: DriverSettings,
    scheduler: InferenceScheduler,
    cache: DetectionCache,
    smoother: TemporalSmoother,
    renderer: OverlayRenderer,
    /// `None` in passthrough mode.
    estimator: Option<Box<dyn PoseEstimator>>,
    degraded: bool,
    state: DriverState,
}

impl PipelineDriver {
    /// Probes the estimator once. An unavailable backend is replaced by the
    /// fallback after a single `no-pose-backend` warning.
    pub fn new(
        settings: DriverSettings,
        estimator: Box<dyn PoseEstimator>,
        fallback: FallbackMode,
    ) -> Result<Self, ConfigError> {
        if settings.stride < 1 {
            return Err(ConfigError::InvalidStride(i64::from(settings.stride)));
        }
        if !settings.min_visibility.is_finite() || !(0.0..=1.0).contains(&settings.min_visibility) {
            return Err(ConfigError::InvalidMinVisibility(settings.min_visibility));
        }
        settings.style.validate()?;
        let smoother = TemporalSmoother::new(settings.alpha)?;

        let (estimator, degraded) = if estimator.is_available() {
            info!("Pose backend: {}", estimator.name());
            (Some(estimator), false)
        } else {
            warn!(
                "no-pose-backend: '{}' is unavailable, continuing with {:?} fallback",
                estimator.name(),
                fallback
            );
            let replacement: Option<Box<dyn PoseEstimator>> = match fallback {
                FallbackMode::Passthrough => None,
                FallbackMode::Heuristic => Some(Box::new(MotionHeuristicEstimator::default())),
            };
            (replacement, true)
        };

        Ok(Self {
            scheduler: InferenceScheduler::new(settings.stride),
            cache: DetectionCache::new(),
            smoother,
            renderer: OverlayRenderer::new(settings.style),
            estimator,
            degraded,
            state: DriverState::AwaitingFirstDetection,
            settings,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Name of the backend actually producing detections.
    pub fn backend_name(&self) -> &str {
        self.estimator.as_ref().map_or("passthrough", |e| e.name())
    }

    /// Runs one frame through the pipeline, drawing onto it in place.
    pub fn process_frame(&mut self, index: u64, frame: &mut RgbImage) -> FrameOutcome {
        let inferred = self.estimator.is_some() && self.scheduler.should_infer(index);

        let fresh = if inferred {
            let result = self.detect(index, frame);
            self.cache.on_inference_run(result)
        } else {
            self.cache.on_inference_skipped();
            false
        };

        let smoothed = self
            .cache
            .last_detection()
            .map(|detection| self.smoother.update(detection).clone());

        let stats = match &smoothed {
            Some(landmarks) => {
                self.state = DriverState::Tracking;
                self.renderer
                    .render(frame, landmarks, &self.settings.topology, self.settings.min_visibility)
            }
            None => OverlayStats::default(),
        };

        let detection = match (&smoothed, fresh) {
            (None, _) => DetectionSource::None,
            (Some(_), true) => DetectionSource::Fresh,
            (Some(_), false) => DetectionSource::Held,
        };

        debug!(
            "Frame {}: inferred={} detection={} markers={} edges={}",
            index,
            inferred,
            detection.as_str(),
            stats.markers,
            stats.edges
        );

        FrameOutcome {
            index,
            inferred,
            detection,
            smoothed,
            stats,
        }
    }

    // Backend failures on a single frame count as a miss
    fn detect(&mut self, index: u64, frame: &RgbImage) -> Option<LandmarkSet> {
        let expected = self.settings.topology.landmark_count();
        let estimator = self.estimator.as_mut()?;

        let result = estimator.infer(index, frame).and_then(|detection| match detection {
            Some(set) if set.len() != expected => Err(EstimatorError::LandmarkCount {
                expected,
                got: set.len(),
            }),
            other => Ok(other),
        });

        match result {
            Ok(detection) => detection,
            Err(EstimatorError::Unavailable) => {
                debug!("Frame {}: backend unavailable", index);
                None
            }
            Err(e) => {
                warn!("Frame {}: pose inference failed: {}", index, e);
                None
            }
        }
    }

    /// Drains `source` into `sink`, stopping early on the frame limit or when
    /// an observer asks to. Observers are finished on every normal exit; the
    /// sink is left open for the caller to close.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn VideoSink,
        observers: &mut [&mut dyn FrameObserver],
    ) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary {
            frames: 0,
            inferences: 0,
            detections: 0,
            rendered: 0,
            passed_through: 0,
            degraded: self.degraded,
            end: EndReason::EndOfStream,
        };

        summary.end = loop {
            if let Some(limit) = self.settings.max_frames {
                if summary.frames >= limit {
                    break EndReason::MaxFrames;
                }
            }

            let Some(mut frame) = source.next_frame()? else {
                break EndReason::EndOfStream;
            };

            let index = summary.frames + 1;
            let outcome = self.process_frame(index, &mut frame);

            summary.frames = index;
            summary.inferences += u64::from(outcome.inferred);
            summary.detections += u64::from(outcome.detection == DetectionSource::Fresh);
            if outcome.smoothed.is_some() {
                summary.rendered += 1;
            } else {
                summary.passed_through += 1;
            }

            let mut control = Control::Continue;
            for observer in observers.iter_mut() {
                if observer.on_frame(&outcome, &frame)? == Control::Stop {
                    control = Control::Stop;
                }
            }

            sink.write(&frame)?;

            if control == Control::Stop {
                info!("Stopped by viewer at frame {}", index);
                break EndReason::Interrupted;
            }
        };

        self.state = DriverState::Drained;

        for observer in observers.iter_mut() {
            observer.finish()?;
        }

        info!(
            "Processed {} frames ({} inferences, {} detections, {} passed through), end: {:?}",
            summary.frames, summary.inferences, summary.detections, summary.passed_through, summary.end
        );
        Ok(summary)
    }
}
