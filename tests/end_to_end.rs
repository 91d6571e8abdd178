// tests/end_to_end.rs - Whole-pipeline runs over in-memory video
use betagen_pose::config::{FallbackMode, PipelineConfig};
use betagen_pose::data::{FramePoseRecord, KeypointsPayload, PoseKeypoint, TrackingCsvWriter};
use betagen_pose::estimator::{self, NoBackend, PoseEstimator, ReplayEstimator};
use betagen_pose::landmarks::{landmark_name, POSE_LANDMARK_COUNT};
use betagen_pose::pipeline::{DriverSettings, EndReason, FrameObserver, PipelineDriver};
use betagen_pose::video::{MemorySink, MemorySource, VideoSink};
use image::{Rgb, RgbImage};

const BACKGROUND: Rgb<u8> = Rgb([30, 30, 30]);

fn frames(count: usize, width: u32, height: u32) -> Vec<RgbImage> {
    (0..count)
        .map(|_| RgbImage::from_pixel(width, height, BACKGROUND))
        .collect()
}

fn record(frame_index: u64, x: f64, y: f64, confidence: f64) -> FramePoseRecord {
    FramePoseRecord {
        frame_index,
        keypoints: (0..POSE_LANDMARK_COUNT)
            .map(|i| PoseKeypoint {
                name: landmark_name(i),
                x,
                y,
                confidence,
            })
            .collect(),
        confidence,
        bbox: None,
    }
}

fn replay(records: Vec<FramePoseRecord>) -> Box<dyn PoseEstimator> {
    let payload = KeypointsPayload {
        video_id: "wall-3".into(),
        model: "offline".into(),
        frames: records,
        meta: Default::default(),
    };
    Box::new(ReplayEstimator::from_payload("offline.json", &payload))
}

fn settings_for(config: PipelineConfig) -> DriverSettings {
    DriverSettings::from_config(&config).unwrap()
}

#[test]
fn overlay_appears_from_first_detection_onwards() {
    let config = PipelineConfig {
        every_n: 3,
        alpha: 0.5,
        min_visibility: 0.2,
        ..Default::default()
    };
    let backend = replay(vec![record(3, 50.0, 50.0, 1.0), record(6, 50.0, 50.0, 1.0), record(9, 50.0, 50.0, 1.0)]);
    let mut driver = PipelineDriver::new(settings_for(config), backend, FallbackMode::Passthrough).unwrap();

    let input = frames(10, 100, 80);
    let mut source = MemorySource::new(input.clone(), 25.0);
    let mut sink = MemorySink::open(100, 80, 25.0);

    let summary = driver.run(&mut source, &mut sink, &mut []).unwrap();
    sink.close().unwrap();

    assert_eq!(summary.frames, 10);
    assert_eq!(summary.inferences, 3);
    assert_eq!(summary.detections, 3);
    assert!(!summary.degraded);

    let output = sink.frames();
    assert_eq!(output[0], input[0]);
    assert_eq!(output[1], input[1]);
    for frame in &output[2..] {
        assert_eq!(*frame.get_pixel(50, 50), Rgb([0, 255, 0]));
        // Far corner stays untouched
        assert_eq!(*frame.get_pixel(0, 0), BACKGROUND);
    }
}

#[test]
fn low_confidence_pose_draws_nothing() {
    let config = PipelineConfig {
        min_visibility: 0.5,
        ..Default::default()
    };
    let backend = replay(vec![record(1, 40.0, 40.0, 0.3)]);
    let mut driver = PipelineDriver::new(settings_for(config), backend, FallbackMode::Passthrough).unwrap();

    let input = frames(3, 80, 80);
    let mut source = MemorySource::new(input.clone(), 30.0);
    let mut sink = MemorySink::open(80, 80, 30.0);
    let summary = driver.run(&mut source, &mut sink, &mut []).unwrap();

    assert_eq!(summary.rendered, 3);
    assert_eq!(sink.frames(), &input[..]);
}

#[test]
fn output_is_resized_to_sink_resolution() {
    let mut driver = PipelineDriver::new(DriverSettings::default(), Box::new(NoBackend), FallbackMode::Passthrough)
        .unwrap();
    let mut source = MemorySource::new(frames(2, 320, 240), 30.0);
    let mut sink = MemorySink::open(640, 480, 30.0);

    driver.run(&mut source, &mut sink, &mut []).unwrap();

    assert!(sink.frames().iter().all(|f| f.dimensions() == (640, 480)));
}

#[test]
fn missing_backend_falls_back_to_heuristic() {
    let backend = estimator::from_config(&betagen_pose::BackendConfig::Replay {
        path: "/no/such/poses.json".into(),
    });
    let mut driver = PipelineDriver::new(DriverSettings::default(), backend, FallbackMode::Heuristic).unwrap();
    assert_eq!(driver.backend_name(), "heuristic");

    // A bright block moving across a dark background
    let input: Vec<RgbImage> = (0..4u32)
        .map(|i| {
            let mut frame = RgbImage::from_pixel(120, 120, BACKGROUND);
            for y in 20..100 {
                for x in (10 + i * 20)..(40 + i * 20) {
                    frame.put_pixel(x, y, Rgb([220, 220, 220]));
                }
            }
            frame
        })
        .collect();
    let mut source = MemorySource::new(input.clone(), 30.0);
    let mut sink = MemorySink::open(120, 120, 30.0);

    let summary = driver.run(&mut source, &mut sink, &mut []).unwrap();

    assert!(summary.degraded);
    assert_eq!(summary.end, EndReason::EndOfStream);
    // First frame only primes the motion detector
    assert_eq!(sink.frames()[0], input[0]);
    assert!(summary.rendered >= 1);
}

#[test]
fn tracking_csv_has_a_row_per_frame() {
    let dir = std::env::temp_dir().join(format!("betagen_pose_e2e_{}", uuid::Uuid::new_v4()));
    let path = dir.join("tracking.csv");

    let config = PipelineConfig {
        every_n: 2,
        max_frames: 4,
        ..Default::default()
    };
    let backend = replay(vec![record(2, 10.0, 10.0, 0.9)]);
    let mut driver = PipelineDriver::new(settings_for(config), backend, FallbackMode::Passthrough).unwrap();
    let mut tracking = TrackingCsvWriter::create(&path).unwrap();

    let mut source = MemorySource::new(frames(6, 32, 32), 30.0);
    let mut sink = MemorySink::open(32, 32, 30.0);
    let mut observers: [&mut dyn FrameObserver; 1] = [&mut tracking];
    let summary = driver.run(&mut source, &mut sink, &mut observers).unwrap();

    assert_eq!(summary.end, EndReason::MaxFrames);

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let detections: Vec<String> = reader
        .records()
        .map(|r| r.unwrap()[2].to_string())
        .collect();
    assert_eq!(detections, vec!["none", "fresh", "held", "held"]);

    std::fs::remove_dir_all(dir).ok();
}
