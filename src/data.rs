// src/data.rs - Exports fed from the pipeline: keypoints JSON, tracking CSV, frame dumps
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Local;
use csv::Writer;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ExportError;
use crate::landmarks::{landmark_name, LandmarkSet, POSE_LANDMARK_COUNT};
use crate::pipeline::{Control, FrameObserver, FrameOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseKeypoint {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePoseRecord {
    pub frame_index: u64,
    pub keypoints: Vec<PoseKeypoint>,
    pub confidence: f64,
    /// `[x_min, y_min, x_max, y_max]` of the visible keypoints.
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
}

/// Per-video pose document consumed by the analysis frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeypointsPayload {
    pub video_id: String,
    pub model: String,
    #[serde(default)]
    pub frames: Vec<FramePoseRecord>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl FramePoseRecord {
    pub fn from_landmarks(frame_index: u64, landmarks: &LandmarkSet, min_visibility: f64) -> Self {
        let keypoints = landmarks
            .iter()
            .enumerate()
            .map(|(i, lm)| PoseKeypoint {
                name: landmark_name(i),
                x: lm.position.x,
                y: lm.position.y,
                confidence: lm.confidence,
            })
            .collect();

        Self {
            frame_index,
            keypoints,
            confidence: landmarks.average_confidence(),
            bbox: landmarks.bounding_box(min_visibility),
        }
    }
}

/// Run parameters recorded in the payload's `meta` block.
#[derive(Debug, Clone)]
pub struct ExportContext {
    pub model: String,
    pub output_size: (u32, u32),
    pub every_n: u32,
    pub alpha: f64,
    pub min_visibility: f64,
    pub degraded: bool,
}

/// Collects smoothed poses and writes them as one JSON document on finish.
pub struct KeypointExporter {
    path: PathBuf,
    min_visibility: f64,
    payload: KeypointsPayload,
}

impl KeypointExporter {
    pub fn new(path: impl AsRef<Path>, video_id: Option<String>, context: &ExportContext) -> Self {
        let video_id = video_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut meta = Map::new();
        meta.insert(
            "output_resolution".into(),
            json!(format!("{}x{}", context.output_size.0, context.output_size.1)),
        );
        meta.insert("every_n_frames".into(), json!(context.every_n));
        meta.insert("alpha".into(), json!(context.alpha));
        meta.insert("min_visibility".into(), json!(context.min_visibility));
        meta.insert("degraded".into(), json!(context.degraded));

        Self {
            path: path.as_ref().to_path_buf(),
            min_visibility: context.min_visibility,
            payload: KeypointsPayload {
                video_id,
                model: context.model.clone(),
                frames: Vec::new(),
                meta,
            },
        }
    }

    pub fn payload(&self) -> &KeypointsPayload {
        &self.payload
    }

    pub fn export(&mut self) -> Result<PathBuf, ExportError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.payload
            .meta
            .insert("generated_at".into(), json!(Local::now().to_rfc3339()));

        let file = File::create(&self.path)?;
        serde_json::to_writer_pretty(file, &self.payload)?;

        info!(
            "Wrote {} pose records to {}",
            self.payload.frames.len(),
            self.path.display()
        );
        Ok(self.path.clone())
    }
}

impl FrameObserver for KeypointExporter {
    fn on_frame(&mut self, outcome: &FrameOutcome, _frame: &RgbImage) -> Result<Control, ExportError> {
        if let Some(landmarks) = &outcome.smoothed {
            self.payload
                .frames
                .push(FramePoseRecord::from_landmarks(outcome.index, landmarks, self.min_visibility));
        }
        Ok(Control::Continue)
    }

    fn finish(&mut self) -> Result<(), ExportError> {
        self.export().map(|_| ())
    }
}

/// One CSV row per frame with every landmark's smoothed position.
pub struct TrackingCsvWriter {
    path: PathBuf,
    writer: Writer<File>,
    rows: u64,
}

impl TrackingCsvWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = Writer::from_path(&path)?;
        writer.write_record(header())?;

        Ok(Self { path, writer, rows: 0 })
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }
}

fn header() -> Vec<String> {
    let mut columns = vec!["frame".to_string(), "inferred".to_string(), "detection".to_string()];
    for i in 0..POSE_LANDMARK_COUNT {
        let name = landmark_name(i);
        columns.push(format!("{name}_x"));
        columns.push(format!("{name}_y"));
        columns.push(format!("{name}_confidence"));
    }
    columns
}

fn row(outcome: &FrameOutcome) -> Vec<String> {
    let mut fields = vec![
        outcome.index.to_string(),
        outcome.inferred.to_string(),
        outcome.detection.as_str().to_string(),
    ];
    for i in 0..POSE_LANDMARK_COUNT {
        match outcome.smoothed.as_ref().and_then(|set| set.get(i)) {
            Some(lm) => {
                fields.push(format!("{:.3}", lm.position.x));
                fields.push(format!("{:.3}", lm.position.y));
                fields.push(format!("{:.4}", lm.confidence));
            }
            None => fields.extend(std::iter::repeat(String::new()).take(3)),
        }
    }
    fields
}

impl FrameObserver for TrackingCsvWriter {
    fn on_frame(&mut self, outcome: &FrameOutcome, _frame: &RgbImage) -> Result<Control, ExportError> {
        self.writer.write_record(row(outcome))?;
        self.rows += 1;
        Ok(Control::Continue)
    }

    fn finish(&mut self) -> Result<(), ExportError> {
        self.writer.flush()?;
        info!("Wrote {} tracking rows to {}", self.rows, self.path.display());
        Ok(())
    }
}

/// Saves every k-th output frame as a JPEG for debugging.
pub struct FrameDumper {
    dir: PathBuf,
    every: u64,
    saved: u64,
}

impl FrameDumper {
    pub fn new(dir: impl AsRef<Path>, every: u64) -> Result<Self, ExportError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            every: every.max(1),
            saved: 0,
        })
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{index:06}.jpg"))
    }

    pub fn saved(&self) -> u64 {
        self.saved
    }
}

impl FrameObserver for FrameDumper {
    fn on_frame(&mut self, outcome: &FrameOutcome, frame: &RgbImage) -> Result<Control, ExportError> {
        if outcome.index % self.every == 0 {
            let path = self.frame_path(outcome.index);
            frame.save(&path)?;
            debug!("Saved {}", path.display());
            self.saved += 1;
        }
        Ok(Control::Continue)
    }

    fn finish(&mut self) -> Result<(), ExportError> {
        if self.saved > 0 {
            info!("Saved {} debug frames to {}", self.saved, self.dir.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::OverlayStats;
    use crate::pipeline::DetectionSource;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("betagen_pose_{}_{}", name, Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn outcome(index: u64, smoothed: Option<LandmarkSet>) -> FrameOutcome {
        FrameOutcome {
            index,
            inferred: smoothed.is_some(),
            detection: if smoothed.is_some() {
                DetectionSource::Fresh
            } else {
                DetectionSource::None
            },
            smoothed,
            stats: OverlayStats::default(),
        }
    }

    fn context() -> ExportContext {
        ExportContext {
            model: "scripted".into(),
            output_size: (640, 480),
            every_n: 3,
            alpha: 0.5,
            min_visibility: 0.2,
            degraded: false,
        }
    }

    #[test]
    fn test_keypoint_export_records_only_posed_frames() {
        let dir = scratch_dir("json");
        let path = dir.join("out").join("keypoints.json");
        let mut exporter = KeypointExporter::new(&path, None, &context());
        let frame = RgbImage::new(2, 2);
        let pose = LandmarkSet::uniform(POSE_LANDMARK_COUNT, 12.0, 34.0, 0.8);

        exporter.on_frame(&outcome(1, None), &frame).unwrap();
        exporter.on_frame(&outcome(2, Some(pose)), &frame).unwrap();
        exporter.finish().unwrap();

        let written: KeypointsPayload = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(Uuid::parse_str(&written.video_id).is_ok());
        assert_eq!(written.model, "scripted");
        assert_eq!(written.frames.len(), 1);

        let record = &written.frames[0];
        assert_eq!(record.frame_index, 2);
        assert_eq!(record.keypoints.len(), POSE_LANDMARK_COUNT);
        assert_eq!(record.keypoints[0].name, "nose");
        assert!((record.confidence - 0.8).abs() < 1e-9);
        assert_eq!(record.bbox, Some([12.0, 34.0, 12.0, 34.0]));

        assert_eq!(written.meta["output_resolution"], json!("640x480"));
        assert_eq!(written.meta["every_n_frames"], json!(3));
        assert!(written.meta.contains_key("generated_at"));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_bbox_ignores_low_confidence_points() {
        let mut landmarks = vec![crate::landmarks::Landmark::new(0.0, 0.0, 0.05); POSE_LANDMARK_COUNT];
        landmarks[0] = crate::landmarks::Landmark::new(5.0, 6.0, 0.9);
        landmarks[1] = crate::landmarks::Landmark::new(15.0, 2.0, 0.9);
        let record = FramePoseRecord::from_landmarks(7, &LandmarkSet::new(landmarks), 0.2);
        assert_eq!(record.bbox, Some([5.0, 2.0, 15.0, 6.0]));
    }

    #[test]
    fn test_tracking_csv_layout() {
        let dir = scratch_dir("csv");
        let path = dir.join("tracking.csv");
        let mut writer = TrackingCsvWriter::create(&path).unwrap();
        let frame = RgbImage::new(2, 2);

        writer.on_frame(&outcome(1, None), &frame).unwrap();
        writer
            .on_frame(
                &outcome(2, Some(LandmarkSet::uniform(POSE_LANDMARK_COUNT, 1.5, 2.5, 1.0))),
                &frame,
            )
            .unwrap();
        writer.finish().unwrap();
        assert_eq!(writer.rows(), 2);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 3 + 3 * POSE_LANDMARK_COUNT);
        assert_eq!(&headers[3], "nose_x");
        assert_eq!(&headers[headers.len() - 1], "right_foot_index_confidence");

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(&rows[0][2], "none");
        assert_eq!(&rows[0][3], "");
        assert_eq!(&rows[1][2], "fresh");
        assert_eq!(&rows[1][3], "1.500");

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_frame_dumper_saves_every_kth_frame() {
        let dir = scratch_dir("dump");
        let mut dumper = FrameDumper::new(&dir, 2).unwrap();
        let frame = RgbImage::new(8, 8);

        for index in 1..=5 {
            dumper.on_frame(&outcome(index, None), &frame).unwrap();
        }

        assert_eq!(dumper.saved(), 2);
        assert!(dumper.frame_path(2).exists());
        assert!(dumper.frame_path(4).exists());
        assert!(!dumper.frame_path(1).exists());
        assert!(dir.join("frame_000004.jpg").exists());

        std::fs::remove_dir_all(dir).ok();
    }
}
