//! linegate-core: shared vocabulary for the linegate workspace
//!
//! Camera identifiers, bounding boxes, length units, the semantic
//! signal classes the PLC understands, and the typed line configuration
//! every other crate is driven from.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    CameraConfig, ControlConfig, DetectionConfig, LineConfig, LineStatusConfig, MeasurementConfig,
    OperatorConfig, PlcConfig, ReleasePolicy, RoiConfig, SignalConfig, SignalsConfig, SourceConfig,
};
pub use error::{Error, Result};
pub use types::{BBox, CameraId, LengthUnit, Point, SignalClass};
