//! linegate-eye: the vision side of the line controller
//!
//! Frames come from [`FrameSource`]s driven by the [`CameraManager`], which
//! publishes only the newest frame per camera into a [`LatestFrame`] slot.
//! A [`Detector`] turns a frame into raw detections, and the
//! [`DetectionMapper`] filters them (confidence, ROI), measures pieces and
//! decides which PLC signals each frame asks for.

pub mod broken;
pub mod camera;
pub mod classes;
pub mod detector;
pub mod error;
pub mod frame;
pub mod history;
pub mod mapper;
pub mod measurement;
pub mod roi;
pub mod sources;

pub use broken::{BrokenAnalysis, BrokenPieceAnalyzer};
pub use camera::{CameraManager, CameraState, CameraStatus};
pub use classes::{ClassMap, ClassSignal};
pub use detector::{Detector, NullDetector, RawDetection, ReplayDetector};
pub use error::VisionError;
pub use frame::{Frame, FrameSource, LatestFrame, RawFrame};
pub use history::{DetectionHistory, HistoryStats};
pub use mapper::{Detection, DetectionMapper, FrameAnalysis, TriggerRequest};
pub use measurement::{Measurements, PieceMeasurer};
pub use roi::Roi;
pub use sources::{source_from_config, HttpSnapshotSource, ReplaySource};
