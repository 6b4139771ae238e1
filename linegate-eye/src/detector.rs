//! Detector seam
//!
//! Inference itself is not part of linegate. Anything that can turn a
//! [`Frame`] into labelled boxes implements [`Detector`].

use crate::error::VisionError;
use crate::frame::Frame;
use linegate_core::{BBox, CameraId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use tracing::info;

/// Detector output before any filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f64,
    pub bbox: BBox,
}

impl RawDetection {
    pub fn new(label: &str, confidence: f64, bbox: BBox) -> Self {
        Self {
            label: label.to_string(),
            confidence,
            bbox,
        }
    }
}

pub trait Detector: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, VisionError>;
}

/// Detects nothing. Useful to run line-state monitoring alone.
#[derive(Debug, Default)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn name(&self) -> &str {
        "null"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>, VisionError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct ScriptDetection {
    label: String,
    confidence: f64,
    bbox: [i32; 4],
}

#[derive(Debug, Deserialize)]
struct ScriptLine {
    camera: CameraId,
    frame: u64,
    #[serde(default)]
    detections: Vec<ScriptDetection>,
}

/// Plays back recorded detections keyed by camera and frame sequence.
///
/// The script is JSON lines:
///
/// ```text
/// {"camera": 1, "frame": 12, "detections": [{"label": "Pieza", "confidence": 0.91, "bbox": [400, 80, 880, 640]}]}
/// ```
///
/// Frames without an entry yield no detections. With `cycle` enabled the
/// script repeats once the last recorded frame has been passed.
#[derive(Debug, Default)]
pub struct ReplayDetector {
    script: HashMap<(CameraId, u64), Vec<RawDetection>>,
    last_frame: u64,
    cycle: bool,
}

impl ReplayDetector {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, VisionError> {
        let file = std::fs::File::open(path.as_ref())?;
        let detector = Self::from_reader(std::io::BufReader::new(file))?;
        info!(
            "Loaded replay script {} ({} frames)",
            path.as_ref().display(),
            detector.script.len()
        );
        Ok(detector)
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self, VisionError> {
        let mut detector = Self::default();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let entry: ScriptLine = serde_json::from_str(trimmed).map_err(|e| VisionError::Script {
                line: index + 1,
                reason: e.to_string(),
            })?;

            let detections = entry.detections.into_iter().map(|d| RawDetection {
                label: d.label,
                confidence: d.confidence,
                bbox: BBox::new(d.bbox[0], d.bbox[1], d.bbox[2], d.bbox[3]),
            });
            detector
                .script
                .entry((entry.camera, entry.frame))
                .or_default()
                .extend(detections);
            detector.last_frame = detector.last_frame.max(entry.frame);
        }

        Ok(detector)
    }

    pub fn cycle(mut self, cycle: bool) -> Self {
        self.cycle = cycle;
        self
    }

    fn script_frame(&self, sequence: u64) -> u64 {
        if self.cycle && self.last_frame > 0 && sequence > self.last_frame {
            (sequence - 1) % self.last_frame + 1
        } else {
            sequence
        }
    }
}

impl Detector for ReplayDetector {
    fn name(&self) -> &str {
        "replay"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, VisionError> {
        let key = (frame.camera, self.script_frame(frame.sequence));
        Ok(self.script.get(&key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SCRIPT: &str = r#"
# camera 1
{"camera": 1, "frame": 1, "detections": [{"label": "Pieza", "confidence": 0.9, "bbox": [10, 20, 110, 220]}]}
{"camera": 1, "frame": 3, "detections": [{"label": "Operador", "confidence": 0.5, "bbox": [0, 0, 50, 50]}]}
{"camera": 2, "frame": 1}
"#;

    #[test]
    fn test_replay_lookup() {
        let mut detector = ReplayDetector::from_reader(Cursor::new(SCRIPT)).unwrap();

        let hits = detector.detect(&Frame::blank(CameraId(1), 4, 4, 1)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].label, "Pieza");
        assert_eq!(hits[0].bbox, BBox::new(10, 20, 110, 220));

        assert!(detector.detect(&Frame::blank(CameraId(1), 4, 4, 2)).unwrap().is_empty());
        assert!(detector.detect(&Frame::blank(CameraId(2), 4, 4, 1)).unwrap().is_empty());
        assert!(detector.detect(&Frame::blank(CameraId(1), 4, 4, 4)).unwrap().is_empty());
    }

    #[test]
    fn test_replay_cycle() {
        let mut detector = ReplayDetector::from_reader(Cursor::new(SCRIPT)).unwrap().cycle(true);
        let hits = detector.detect(&Frame::blank(CameraId(1), 4, 4, 4)).unwrap();
        assert_eq!(hits[0].label, "Pieza");
        let hits = detector.detect(&Frame::blank(CameraId(1), 4, 4, 6)).unwrap();
        assert_eq!(hits[0].label, "Operador");
    }

    #[test]
    fn test_script_error_reports_line() {
        let err = ReplayDetector::from_reader(Cursor::new("{\"camera\": 1}\nnot json")).unwrap_err();
        match err {
            VisionError::Script { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_null_detector() {
        let mut detector = NullDetector;
        assert!(detector.detect(&Frame::blank(CameraId(1), 2, 2, 1)).unwrap().is_empty());
    }
}
