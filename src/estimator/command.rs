// src/estimator/command.rs - Pose backend driving a helper process over line-delimited JSON
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::PoseEstimator;
use crate::error::EstimatorError;
use crate::landmarks::{Landmark, LandmarkSet};

#[derive(Debug, Deserialize)]
struct Handshake {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct FrameHeader {
    frame_index: u64,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    landmarks: Option<Vec<[f64; 3]>>,
}

struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Pose backend running in a helper process.
///
/// The helper prints `{"ready":true}` once its model is loaded. For each
/// frame it receives a JSON header line followed by `width*height*3` raw RGB
/// bytes and answers with one line, `{"landmarks":[[x,y,conf],...]}` in
/// pixel coordinates or `{"landmarks":null}`.
pub struct CommandEstimator {
    program: String,
    model: Option<String>,
    worker: Option<Worker>,
}

impl CommandEstimator {
    pub fn spawn(program: &str, args: &[String]) -> Self {
        let mut estimator = Self {
            program: program.to_string(),
            model: None,
            worker: None,
        };

        match start_worker(program, args) {
            Ok((worker, handshake)) => {
                info!(
                    "Pose helper '{}' ready (model {})",
                    program,
                    handshake.model.as_deref().unwrap_or("unknown")
                );
                estimator.model = handshake.model;
                estimator.worker = Some(worker);
            }
            Err(e) => debug!("Pose helper '{}' failed to start: {}", program, e),
        }

        estimator
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            drop(worker.stdin);
            let _ = worker.child.kill();
            let _ = worker.child.wait();
        }
    }
}

fn start_worker(program: &str, args: &[String]) -> Result<(Worker, Handshake), EstimatorError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(EstimatorError::Protocol("helper stdio unavailable".into()));
    };
    let mut worker = Worker {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    };

    let handshake: Result<Handshake, EstimatorError> = read_line(&mut worker.stdout)
        .and_then(|line| serde_json::from_str(&line).map_err(EstimatorError::from));

    match handshake {
        Ok(handshake) if handshake.ready => Ok((worker, handshake)),
        other => {
            let _ = worker.child.kill();
            let _ = worker.child.wait();
            match other {
                Err(e) => Err(e),
                Ok(_) => Err(EstimatorError::Protocol("helper reported not ready".into())),
            }
        }
    }
}

fn read_line(reader: &mut impl BufRead) -> Result<String, EstimatorError> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(EstimatorError::Protocol("helper closed its output".into()));
    }
    Ok(line)
}

fn exchange(worker: &mut Worker, frame_index: u64, frame: &RgbImage) -> Result<String, EstimatorError> {
    let header = FrameHeader {
        frame_index,
        width: frame.width(),
        height: frame.height(),
    };
    serde_json::to_writer(&mut worker.stdin, &header)?;
    worker.stdin.write_all(b"\n")?;
    worker.stdin.write_all(frame.as_raw())?;
    worker.stdin.flush()?;
    read_line(&mut worker.stdout)
}

fn parse_reply(line: &str) -> Result<Option<LandmarkSet>, EstimatorError> {
    let reply: Reply = serde_json::from_str(line)?;
    Ok(reply.landmarks.map(|points| {
        LandmarkSet::new(
            points
                .into_iter()
                .map(|[x, y, confidence]| Landmark::new(x, y, confidence))
                .collect(),
        )
    }))
}

impl PoseEstimator for CommandEstimator {
    fn name(&self) -> &str {
        "command"
    }

    fn is_available(&self) -> bool {
        self.worker.is_some()
    }

    fn infer(&mut self, frame_index: u64, frame: &RgbImage) -> Result<Option<LandmarkSet>, EstimatorError> {
        let worker = self.worker.as_mut().ok_or(EstimatorError::Unavailable)?;

        let exchange = exchange(worker, frame_index, frame);

        match exchange {
            Ok(line) => parse_reply(&line),
            Err(e) => {
                // The pipe is unusable after a failed exchange
                warn!("Pose helper '{}' stopped responding: {}", self.program, e);
                self.shutdown();
                Err(e)
            }
        }
    }
}

impl Drop for CommandEstimator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply_with_and_without_person() {
        let set = parse_reply(r#"{"landmarks":[[10.5,20.0,0.9],[-3.0,400.0,1.2]]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set[0].position.x, 10.5);
        assert_eq!(set[1].confidence, 1.0);

        assert!(parse_reply(r#"{"landmarks":null}"#).unwrap().is_none());
        assert!(parse_reply("{}").unwrap().is_none());
        assert!(parse_reply("not json").is_err());
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let mut estimator = CommandEstimator::spawn("/nonexistent/pose-helper", &[]);
        assert!(!estimator.is_available());
        assert!(matches!(
            estimator.infer(1, &RgbImage::new(2, 2)),
            Err(EstimatorError::Unavailable)
        ));
    }
}
