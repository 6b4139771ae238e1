//! Frames and the single-slot latest-frame cell

use crate::error::VisionError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use linegate_core::CameraId;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Pixels as produced by a source, before the camera manager stamps them
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Packed BGR8, row-major
    pub data: Bytes,
}

/// A captured frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera: CameraId,
    pub width: u32,
    pub height: u32,
    /// Packed BGR8, row-major
    pub data: Bytes,
    /// Per-camera capture counter, starting at 1
    pub sequence: u64,
    pub captured_at: Instant,
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    pub fn from_raw(camera: CameraId, sequence: u64, raw: RawFrame) -> Self {
        Self {
            camera,
            width: raw.width,
            height: raw.height,
            data: raw.data,
            sequence,
            captured_at: Instant::now(),
            timestamp: Utc::now(),
        }
    }

    /// Solid black frame, mostly for tests and replay runs
    pub fn blank(camera: CameraId, width: u32, height: u32, sequence: u64) -> Self {
        let raw = RawFrame {
            width,
            height,
            data: Bytes::from(vec![0u8; width as usize * height as usize * 3]),
        };
        Self::from_raw(camera, sequence, raw)
    }
}

/// A camera-like producer of frames.
///
/// `Ok(None)` means "nothing new right now" and is not an error.
#[async_trait]
pub trait FrameSource: Send {
    fn describe(&self) -> String;

    async fn next_frame(&mut self) -> Result<Option<RawFrame>, VisionError>;

    /// Target spacing between frames
    fn frame_interval(&self) -> Duration;
}

/// Single-slot cell holding only the newest frame of one camera.
///
/// Producers overwrite, the consumer takes. Older frames are dropped, never
/// queued, so the control loop can not fall behind the cameras.
#[derive(Debug, Clone, Default)]
pub struct LatestFrame {
    slot: Arc<Mutex<Option<Frame>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a frame, returning true if an unconsumed frame was overwritten
    pub fn publish(&self, frame: Frame) -> bool {
        self.slot.lock().replace(frame).is_some()
    }

    /// Take the newest frame, leaving the slot empty
    pub fn take(&self) -> Option<Frame> {
        self.slot.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_frame_keeps_newest() {
        let slot = LatestFrame::new();
        assert!(slot.take().is_none());

        assert!(!slot.publish(Frame::blank(CameraId(1), 4, 4, 1)));
        assert!(slot.publish(Frame::blank(CameraId(1), 4, 4, 2)));

        let frame = slot.take().unwrap();
        assert_eq!(frame.sequence, 2);
        assert!(slot.is_empty());
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_clones_share_slot() {
        let producer = LatestFrame::new();
        let consumer = producer.clone();
        producer.publish(Frame::blank(CameraId(2), 2, 2, 9));
        assert_eq!(consumer.take().map(|f| f.camera), Some(CameraId(2)));
    }

    #[test]
    fn test_blank_frame_size() {
        let frame = Frame::blank(CameraId(1), 8, 6, 1);
        assert_eq!(frame.data.len(), 8 * 6 * 3);
    }
}
