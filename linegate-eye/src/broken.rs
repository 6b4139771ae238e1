//! Broken-piece analysis over one frame's detections

use linegate_core::{CameraId, SignalClass};
use serde::Serialize;

/// Cooldown label used for pulses requested by the analyzer
pub const BROKEN_PIECE_LABEL: &str = "pieza_quebrada";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokenAnalysis {
    pub camera: CameraId,
    /// Number of fragments carrying an explicit broken label
    pub fragment_count: usize,
    /// Highest confidence among those fragments
    pub confidence: f64,
    pub method: &'static str,
}

/// Counts explicit broken-label detections inside the ROI.
///
/// Only fires when at least one such detection exists; a frame without one
/// keeps whatever broken count the measurement check produced.
#[derive(Debug, Clone, Default)]
pub struct BrokenPieceAnalyzer {
    enabled: bool,
}

impl BrokenPieceAnalyzer {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// `detections` yields (label, confidence, in_roi)
    pub fn analyze<'a, I>(&self, camera: CameraId, detections: I) -> Option<BrokenAnalysis>
    where
        I: IntoIterator<Item = (&'a str, f64, bool)>,
    {
        if !self.enabled {
            return None;
        }

        let mut fragment_count = 0;
        let mut confidence: f64 = 0.0;
        for (label, score, in_roi) in detections {
            if in_roi && SignalClass::resolve(label) == Some(SignalClass::Broken) {
                fragment_count += 1;
                confidence = confidence.max(score);
            }
        }

        (fragment_count > 0).then_some(BrokenAnalysis {
            camera,
            fragment_count,
            confidence,
            method: "label_filter",
        })
    }
}
