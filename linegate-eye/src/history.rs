//! Bounded detection history with duplicate suppression

use crate::mapper::Detection;
use linegate_core::SignalClass;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// How many recent entries are checked for duplicates
const DEDUP_WINDOW: usize = 3;
const DEDUP_DISTANCE_PX: f64 = 30.0;
const DEDUP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub total: usize,
    /// Counts keyed by class display name, or the raw label for unmapped detections
    pub by_class: BTreeMap<String, usize>,
    pub broken_count: usize,
}

/// Ring buffer of the most recent non-operator detections
#[derive(Debug, Clone)]
pub struct DetectionHistory {
    entries: VecDeque<Detection>,
    capacity: usize,
}

impl DetectionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a detection unless it is an operator or a near repeat of a
    /// recent entry. Returns whether it was recorded.
    pub fn record(&mut self, detection: &Detection) -> bool {
        if detection.class == Some(SignalClass::Operator) || self.is_duplicate(detection) {
            return false;
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(detection.clone());
        true
    }

    fn is_duplicate(&self, detection: &Detection) -> bool {
        self.entries.iter().rev().take(DEDUP_WINDOW).any(|previous| {
            previous.label == detection.label
                && previous.center.distance(&detection.center) < DEDUP_DISTANCE_PX
                && detection.captured_at.saturating_duration_since(previous.captured_at) < DEDUP_INTERVAL
        })
    }

    pub fn stats(&self) -> HistoryStats {
        let mut stats = HistoryStats {
            total: self.entries.len(),
            ..HistoryStats::default()
        };
        for entry in &self.entries {
            let key = entry
                .class
                .map(|class| class.display_name().to_string())
                .unwrap_or_else(|| entry.label.clone());
            *stats.by_class.entry(key).or_default() += 1;
            if entry.is_broken {
                stats.broken_count += 1;
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use linegate_core::{BBox, CameraId};
    use tokio::time::Instant;

    fn detection(label: &str, x: i32, captured_at: Instant) -> Detection {
        let bbox = BBox::new(x, 100, x + 40, 140);
        Detection {
            label: label.to_string(),
            class: SignalClass::resolve(label),
            confidence: 0.9,
            bbox,
            center: bbox.center(),
            in_roi: true,
            camera: CameraId(1),
            measurements: None,
            is_broken: label == "Quebrada",
            timestamp: Utc::now(),
            captured_at,
        }
    }

    #[test]
    fn test_operator_is_never_recorded() {
        let mut history = DetectionHistory::new(10);
        assert!(!history.record(&detection("Operador", 0, Instant::now())));
        assert!(history.is_empty());
    }

    #[test]
    fn test_duplicate_suppression() {
        let t0 = Instant::now();
        let mut history = DetectionHistory::new(10);
        assert!(history.record(&detection("Pieza", 100, t0)));
        // same label, 10 px away, 200 ms later
        assert!(!history.record(&detection("Pieza", 110, t0 + Duration::from_millis(200))));
        // far enough away
        assert!(history.record(&detection("Pieza", 200, t0 + Duration::from_millis(300))));
        // different label at the same spot
        assert!(history.record(&detection("Cruzamiento", 100, t0 + Duration::from_millis(300))));
        // same spot but more than a second later
        assert!(history.record(&detection("Pieza", 100, t0 + Duration::from_millis(1500))));
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn test_dedup_only_looks_at_recent_entries() {
        let t0 = Instant::now();
        let mut history = DetectionHistory::new(10);
        history.record(&detection("Pieza", 0, t0));
        history.record(&detection("Pieza", 300, t0));
        history.record(&detection("Pieza", 600, t0));
        history.record(&detection("Pieza", 900, t0));
        // the entry at x=0 has left the window
        assert!(history.record(&detection("Pieza", 5, t0)));
    }

    #[test]
    fn test_ring_buffer_and_stats() {
        let t0 = Instant::now();
        let mut history = DetectionHistory::new(3);
        history.record(&detection("Pieza", 0, t0));
        history.record(&detection("Quebrada", 300, t0));
        history.record(&detection("Cruzamiento", 600, t0));
        history.record(&detection("Quebrada", 900, t0));
        assert_eq!(history.len(), 3);

        let stats = history.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_class.get("Quebrada"), Some(&2));
        assert_eq!(stats.by_class.get("Cruzamiento"), Some(&1));
        assert_eq!(stats.by_class.get("Pieza"), None);
        assert_eq!(stats.broken_count, 2);

        history.clear();
        assert_eq!(history.stats(), HistoryStats::default());
    }
}
