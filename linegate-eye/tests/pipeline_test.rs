//! Replay detector -> mapper -> history, without cameras

use linegate_core::{CameraConfig, CameraId, LineConfig, LengthUnit, SignalClass};
use linegate_eye::{Detector, DetectionHistory, DetectionMapper, Frame, ReplayDetector};
use std::io::Write;

const SCRIPT: &str = r#"{"camera": 1, "frame": 1, "detections": [{"label": "Cruzamiento", "confidence": 0.92, "bbox": [600, 300, 680, 420]}]}
{"camera": 1, "frame": 2, "detections": [{"label": "Cruzamiento", "confidence": 0.90, "bbox": [604, 302, 684, 422]}]}
{"camera": 1, "frame": 3, "detections": [{"label": "Operador", "confidence": 0.48, "bbox": [10, 10, 200, 700]}]}
{"camera": 1, "frame": 4, "detections": [{"label": "Pieza", "confidence": 0.95, "bbox": [400, 100, 880, 140]}]}
{"camera": 2, "frame": 1, "detections": [{"label": "Cruzamiento", "confidence": 0.95, "bbox": [600, 300, 680, 420]}]}
"#;

fn line_config() -> LineConfig {
    let mut config = LineConfig::default();
    config.plc.enabled = true;
    config.measurement.units = LengthUnit::Cm;
    config.cameras[0].scale_px_per_mm = 2.0;
    config.cameras.push(CameraConfig::new(CameraId(2)));
    config
}

fn detector() -> ReplayDetector {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SCRIPT.as_bytes()).unwrap();
    ReplayDetector::from_path(file.path()).unwrap()
}

#[test]
fn test_replay_through_mapper_and_history() {
    let mut detector = detector();
    let mut mapper = DetectionMapper::from_config(&line_config());
    let mut history = DetectionHistory::new(100);
    let mut triggers = Vec::new();
    let mut operator_frames = Vec::new();

    for sequence in 1..=4 {
        let frame = Frame::blank(CameraId(1), 1280, 720, sequence);
        let raw = detector.detect(&frame).unwrap();
        let analysis = mapper.analyze(&frame, raw);
        for detection in analysis.countable() {
            history.record(detection);
        }
        if analysis.operator_detected {
            operator_frames.push(sequence);
        }
        triggers.extend(analysis.triggers);
    }

    // frame 2 repeats frame 1's crossing a few pixels away
    let stats = history.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_class.get(SignalClass::Crossing.display_name()), Some(&1));
    assert_eq!(stats.by_class.get(SignalClass::Piece.display_name()), Some(&1));
    assert_eq!(operator_frames, vec![3]);

    // every frame asks for its pulse; the gateway cooldown is what throttles
    let crossing: Vec<_> = triggers.iter().filter(|t| t.class == SignalClass::Crossing).collect();
    assert_eq!(crossing.len(), 2);
    assert!(triggers.iter().any(|t| t.class == SignalClass::Operator));
    assert!(!triggers.iter().any(|t| t.class == SignalClass::Piece));
}

#[test]
fn test_piece_measurement_in_configured_units() {
    let mut detector = detector();
    let mut mapper = DetectionMapper::from_config(&line_config());

    let frame = Frame::blank(CameraId(1), 1280, 720, 4);
    let analysis = mapper.analyze(&frame, detector.detect(&frame).unwrap());
    let piece = &analysis.detections[0];
    let measurements = piece.measurements.as_ref().unwrap();

    // 480 x 40 px at 2 px/mm
    assert_eq!(measurements.unit, LengthUnit::Cm);
    assert_eq!(measurements.length, 24.0);
    assert_eq!(measurements.piece_width, 2.0);
    assert!(!piece.is_broken);
}

#[test]
fn test_secondary_camera_detects_but_stays_silent() {
    let mut detector = detector();
    let mut mapper = DetectionMapper::from_config(&line_config());

    let frame = Frame::blank(CameraId(2), 1280, 720, 1);
    let analysis = mapper.analyze(&frame, detector.detect(&frame).unwrap());
    assert_eq!(analysis.detections.len(), 1);
    assert!(analysis.triggers.is_empty());
    assert_eq!(analysis.countable().count(), 0);
}
