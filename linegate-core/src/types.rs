//! Core value types shared by the vision and PLC crates

use serde::{Deserialize, Serialize};
use std::fmt;

/// Camera identifier (1-based, matches the wiring labels on the line)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub u8);

impl CameraId {
    /// The camera that drives the PLC in the stock two-camera layout
    pub const PRIMARY: CameraId = CameraId(1);

    pub fn is_primary(&self) -> bool {
        *self == Self::PRIMARY
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cam{}", self.0)
    }
}

/// Point in frame pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned bounding box in frame pixels (x1,y1 top-left, x2,y2 bottom-right)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1).max(0) as u32
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.x1 as f64 + self.x2 as f64) / 2.0,
            (self.y1 as f64 + self.y2 as f64) / 2.0,
        )
    }
}

/// Physical length unit used for reported measurements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    #[default]
    Mm,
    Cm,
    M,
}

impl LengthUnit {
    /// Millimetres per one of this unit
    pub fn mm_per_unit(&self) -> f64 {
        match self {
            LengthUnit::Mm => 1.0,
            LengthUnit::Cm => 10.0,
            LengthUnit::M => 1000.0,
        }
    }

    pub fn from_mm(&self, mm: f64) -> f64 {
        mm / self.mm_per_unit()
    }

    pub fn to_mm(&self, value: f64) -> f64 {
        value * self.mm_per_unit()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LengthUnit::Mm => "mm",
            LengthUnit::Cm => "cm",
            LengthUnit::M => "m",
        }
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic class the PLC has a dedicated register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalClass {
    /// Crossed pieces ("Cruzamiento")
    Crossing,
    /// Crossed and mounted pieces ("CruzyMont")
    CrossingMounted,
    /// Mounted pieces ("Montada")
    Mounted,
    /// Human operator in frame ("Operador")
    Operator,
    /// Broken piece ("Quebrada")
    Broken,
    /// Warped piece ("Alaveo")
    Warp,
    /// Generic piece ("Pieza")
    Piece,
}

impl SignalClass {
    pub const ALL: [SignalClass; 7] = [
        SignalClass::Crossing,
        SignalClass::CrossingMounted,
        SignalClass::Mounted,
        SignalClass::Operator,
        SignalClass::Broken,
        SignalClass::Warp,
        SignalClass::Piece,
    ];

    /// Resolve a detector label to its signal class.
    ///
    /// Rules are tried in order and the first match wins, so specific names
    /// are checked before the generic prefixes.
    pub fn resolve(label: &str) -> Option<SignalClass> {
        let label = label.trim().to_lowercase();
        if label == "operador" {
            Some(SignalClass::Operator)
        } else if label == "cruzymont" {
            Some(SignalClass::CrossingMounted)
        } else if label.starts_with("cruz") {
            Some(SignalClass::Crossing)
        } else if label.starts_with("monta") {
            Some(SignalClass::Mounted)
        } else if label == "alaveo" {
            Some(SignalClass::Warp)
        } else if matches!(label.as_str(), "quebrada" | "pieza_quebrada" | "broken") {
            Some(SignalClass::Broken)
        } else if label == "pieza" {
            Some(SignalClass::Piece)
        } else {
            None
        }
    }

    /// Display name used on the plant floor
    pub fn display_name(&self) -> &'static str {
        match self {
            SignalClass::Crossing => "Cruzamiento",
            SignalClass::CrossingMounted => "CruzyMont",
            SignalClass::Mounted => "Montada",
            SignalClass::Operator => "Operador",
            SignalClass::Broken => "Quebrada",
            SignalClass::Warp => "Alaveo",
            SignalClass::Piece => "Pieza",
        }
    }
}

impl fmt::Display for SignalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
