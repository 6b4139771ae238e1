//! Detection to trigger mapping
//!
//! [`DetectionMapper`] turns one frame's raw detections into a
//! [`FrameAnalysis`]: detections that pass the class confidence threshold
//! and the camera ROI, their measurements, the operator flag, and the PLC
//! pulses the frame asks for. It never talks to the PLC itself; the control
//! loop hands the [`TriggerRequest`]s to the gateway in order.

use crate::broken::{BrokenAnalysis, BrokenPieceAnalyzer, BROKEN_PIECE_LABEL};
use crate::classes::{min_confidence_for, ClassMap};
use crate::detector::RawDetection;
use crate::frame::Frame;
use crate::measurement::{Measurements, PieceMeasurer};
use crate::roi::Roi;
use chrono::{DateTime, Utc};
use linegate_core::{BBox, CameraConfig, CameraId, LineConfig, Point, SignalClass};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// A detection that passed confidence and ROI filtering
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub label: String,
    pub class: Option<SignalClass>,
    pub confidence: f64,
    pub bbox: BBox,
    pub center: Point,
    pub in_roi: bool,
    pub camera: CameraId,
    pub measurements: Option<Measurements>,
    pub is_broken: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub captured_at: Instant,
}

/// A pulse the frame asks the gateway for
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRequest {
    pub class: SignalClass,
    pub label: String,
    pub camera: CameraId,
    pub address: u16,
    pub value: u16,
    pub duration: Duration,
    pub cooldown: Duration,
    /// Lower-cased label, half of the gateway cooldown key
    pub cooldown_label: String,
}

#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub camera: CameraId,
    pub sequence: u64,
    pub detections: Vec<Detection>,
    pub operator_detected: bool,
    pub broken_count: usize,
    pub broken_analysis: Option<BrokenAnalysis>,
    pub triggers: Vec<TriggerRequest>,
    /// Whether this camera's detections feed the history
    pub record_history: bool,
}

impl FrameAnalysis {
    /// Detections that may go into the history
    pub fn countable(&self) -> impl Iterator<Item = &Detection> {
        self.detections
            .iter()
            .filter(move |d| self.record_history && d.class != Some(SignalClass::Operator))
    }
}

struct CameraView {
    config: CameraConfig,
    measurer: PieceMeasurer,
    roi: Option<(u32, u32, Roi)>,
}

impl CameraView {
    fn new(config: CameraConfig, line: &LineConfig) -> Self {
        let measurer = PieceMeasurer::new(&line.measurement, config.scale_px_per_mm);
        Self {
            config,
            measurer,
            roi: None,
        }
    }

    /// ROI for the frame size, rebuilt only when the size changes
    fn roi(&mut self, width: u32, height: u32) -> &Roi {
        if !matches!(&self.roi, Some((w, h, _)) if *w == width && *h == height) {
            self.roi = None;
        }
        let config = &self.config;
        let (_, _, roi) = self.roi.get_or_insert_with(|| {
            let roi = Roi::from_config(&config.roi, width, height);
            debug!("{} ROI for {}x{}: {:?}", config.id, width, height, roi);
            (width, height, roi)
        });
        roi
    }
}

pub struct DetectionMapper {
    class_map: ClassMap,
    min_confidence: f64,
    measurement_enabled: bool,
    broken_analyzer: BrokenPieceAnalyzer,
    line: LineConfig,
    cameras: HashMap<CameraId, CameraView>,
}

impl DetectionMapper {
    pub fn from_config(config: &LineConfig) -> Self {
        let cameras = config
            .cameras
            .iter()
            .map(|camera| (camera.id, CameraView::new(camera.clone(), config)))
            .collect();

        Self {
            class_map: ClassMap::from_config(config),
            min_confidence: config.detection.min_confidence,
            measurement_enabled: config.measurement.enabled,
            broken_analyzer: BrokenPieceAnalyzer::new(config.measurement.detect_broken),
            line: config.clone(),
            cameras,
        }
    }

    pub fn analyze(&mut self, frame: &Frame, raw: Vec<RawDetection>) -> FrameAnalysis {
        let line = &self.line;
        let view = self.cameras.entry(frame.camera).or_insert_with(|| {
            info!("{} is not configured, using defaults", frame.camera);
            CameraView::new(CameraConfig::new(frame.camera), line)
        });

        let measuring = self.measurement_enabled && view.config.measures();
        let triggering = view.config.triggers_plc();

        let mut analysis = FrameAnalysis {
            camera: frame.camera,
            sequence: frame.sequence,
            detections: Vec::new(),
            operator_detected: false,
            broken_count: 0,
            broken_analysis: None,
            triggers: Vec::new(),
            record_history: view.config.counts_history(),
        };

        for detection in raw {
            let class = SignalClass::resolve(&detection.label);
            if detection.confidence < min_confidence_for(class, self.min_confidence) {
                continue;
            }

            let center = detection.bbox.center();
            let is_operator = class == Some(SignalClass::Operator);
            if !is_operator && !view.roi(frame.width, frame.height).contains(center) {
                continue;
            }

            let measurements = (measuring && !is_operator).then(|| view.measurer.measure(&detection.bbox));
            // An explicit broken label counts with or without measurement
            let is_broken = class == Some(SignalClass::Broken)
                || (class == Some(SignalClass::Piece)
                    && measurements.as_ref().is_some_and(|m| view.measurer.is_broken(m)));

            analysis.operator_detected |= is_operator;
            if is_broken {
                analysis.broken_count += 1;
            }

            if triggering {
                if let Some(class) = class {
                    push_trigger(&mut analysis.triggers, &self.class_map, class, &detection.label, frame.camera);
                }
            }

            analysis.detections.push(Detection {
                label: detection.label,
                class,
                confidence: detection.confidence,
                bbox: detection.bbox,
                center,
                in_roi: true,
                camera: frame.camera,
                measurements,
                is_broken,
                timestamp: frame.timestamp,
                captured_at: frame.captured_at,
            });
        }

        if triggering && self.broken_analyzer.is_enabled() {
            let fragments = analysis
                .detections
                .iter()
                .map(|d| (d.label.as_str(), d.confidence, d.in_roi));
            if let Some(broken) = self.broken_analyzer.analyze(frame.camera, fragments) {
                debug!(
                    "{} broken-piece analysis: {} fragment(s), confidence {:.2}",
                    frame.camera, broken.fragment_count, broken.confidence
                );
                analysis.broken_count = broken.fragment_count;
                analysis.broken_analysis = Some(broken);
                push_trigger(
                    &mut analysis.triggers,
                    &self.class_map,
                    SignalClass::Broken,
                    BROKEN_PIECE_LABEL,
                    frame.camera,
                );
            }
        }

        analysis
    }
}

/// Queue a pulse for `class` unless the class is unarmed or the frame already
/// asked for the same register or cooldown key.
fn push_trigger(triggers: &mut Vec<TriggerRequest>, map: &ClassMap, class: SignalClass, label: &str, camera: CameraId) {
    let Some(signal) = map.trigger_for(class) else {
        return;
    };
    let Some(address) = signal.address else {
        return;
    };

    let cooldown_label = label.trim().to_lowercase();
    let duplicate = triggers
        .iter()
        .any(|t| t.cooldown_label == cooldown_label || (t.class == class && t.address == address));
    if duplicate {
        return;
    }

    triggers.push(TriggerRequest {
        class,
        label: label.to_string(),
        camera,
        address,
        value: signal.value,
        duration: signal.pulse,
        cooldown: signal.cooldown,
        cooldown_label,
    });
}
