//! Pixel to physical unit conversion and piece measurement

use linegate_core::{BBox, LengthUnit, MeasurementConfig};
use serde::Serialize;
use tracing::debug;

/// Axes deviating more than this from the reference length trigger a calibration hint
const CALIBRATION_TOLERANCE: f64 = 0.5;

/// Convert a pixel length to `unit` using a px/mm calibration factor.
/// A non-positive factor means "uncalibrated" and returns the pixels unchanged.
pub fn pixel_to_real(pixels: f64, scale_px_per_mm: f64, unit: LengthUnit) -> f64 {
    if scale_px_per_mm <= 0.0 {
        return pixels;
    }
    unit.from_mm(pixels / scale_px_per_mm)
}

/// Inverse of [`pixel_to_real`]
pub fn real_to_pixel(real: f64, scale_px_per_mm: f64, unit: LengthUnit) -> f64 {
    if scale_px_per_mm <= 0.0 {
        return real;
    }
    unit.to_mm(real) * scale_px_per_mm
}

/// Convert between length units
pub fn convert(value: f64, from: LengthUnit, to: LengthUnit) -> f64 {
    to.from_mm(from.to_mm(value))
}

/// px/mm factor that would make `pixel_length` measure `reference_mm`
pub fn suggest_scale(pixel_length: f64, reference_mm: f64) -> Option<f64> {
    (pixel_length > 0.0 && reference_mm > 0.0).then(|| pixel_length / reference_mm)
}

/// Which bounding-box axis was taken as the piece length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LengthAxis {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurements {
    /// Bounding-box width in `unit`
    pub width: f64,
    /// Bounding-box height in `unit`
    pub height: f64,
    /// Bounding-box area in `unit`²
    pub area: f64,
    /// Piece length (the axis closer to the reference length)
    pub length: f64,
    /// Piece width (the other axis)
    pub piece_width: f64,
    pub length_axis: LengthAxis,
    pub unit: LengthUnit,
    /// Suggested px/mm factor when neither axis looks like the reference length
    pub calibration_hint: Option<f64>,
}

/// Measures pieces for one camera
#[derive(Debug, Clone, PartialEq)]
pub struct PieceMeasurer {
    pub scale_px_per_mm: f64,
    pub unit: LengthUnit,
    pub reference_length_mm: f64,
    pub min_piece_length_mm: f64,
    pub detect_broken: bool,
}

impl PieceMeasurer {
    pub fn new(config: &MeasurementConfig, scale_px_per_mm: f64) -> Self {
        Self {
            scale_px_per_mm,
            unit: config.units,
            reference_length_mm: config.reference_length_mm,
            min_piece_length_mm: config.min_piece_length_mm,
            detect_broken: config.detect_broken,
        }
    }

    pub fn measure(&self, bbox: &BBox) -> Measurements {
        let width_px = bbox.width() as f64;
        let height_px = bbox.height() as f64;
        let width = pixel_to_real(width_px, self.scale_px_per_mm, self.unit);
        let height = pixel_to_real(height_px, self.scale_px_per_mm, self.unit);

        let reference = self.unit.from_mm(self.reference_length_mm);
        let (length, piece_width, length_axis) = if (width - reference).abs() < (height - reference).abs() {
            (width, height, LengthAxis::Horizontal)
        } else {
            (height, width, LengthAxis::Vertical)
        };

        let off = |v: f64| reference > 0.0 && (v - reference).abs() / reference > CALIBRATION_TOLERANCE;
        let calibration_hint = if off(width) && off(height) {
            let hint = suggest_scale(width_px.max(height_px), self.reference_length_mm);
            if let Some(scale) = hint {
                debug!(
                    "Piece axes {:.1}/{:.1} {} far from reference; calibration of {:.3} px/mm would match",
                    width, height, self.unit, scale
                );
            }
            hint
        } else {
            None
        };

        Measurements {
            width,
            height,
            area: width * height,
            length,
            piece_width,
            length_axis,
            unit: self.unit,
            calibration_hint,
        }
    }

    /// Piece shorter than the configured minimum length
    pub fn is_broken(&self, measurements: &Measurements) -> bool {
        self.detect_broken && measurements.length < measurements.unit.from_mm(self.min_piece_length_mm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurer(scale: f64, unit: LengthUnit) -> PieceMeasurer {
        let config = MeasurementConfig {
            units: unit,
            ..MeasurementConfig::default()
        };
        PieceMeasurer::new(&config, scale)
    }

    #[test]
    fn test_pixel_to_real() {
        assert_eq!(pixel_to_real(800.0, 2.0, LengthUnit::Mm), 400.0);
        assert_eq!(pixel_to_real(800.0, 2.0, LengthUnit::Cm), 40.0);
        assert_eq!(pixel_to_real(800.0, 2.0, LengthUnit::M), 0.4);
        assert_eq!(pixel_to_real(800.0, 0.0, LengthUnit::Cm), 800.0);
        assert_eq!(pixel_to_real(800.0, -1.0, LengthUnit::Mm), 800.0);
    }

    #[test]
    fn test_round_trip() {
        let px = real_to_pixel(400.0, 2.0, LengthUnit::Mm);
        assert_eq!(px, 800.0);
        assert!((pixel_to_real(px, 2.0, LengthUnit::Mm) - 400.0).abs() < 1e-9);
        assert!((convert(convert(123.4, LengthUnit::Mm, LengthUnit::Cm), LengthUnit::Cm, LengthUnit::Mm) - 123.4).abs() < 1e-9);
    }

    #[test]
    fn test_length_axis_closest_to_reference() {
        // 800 px wide at 2 px/mm is 400 mm, 8000 px tall is 4000 mm
        let m = measurer(2.0, LengthUnit::Mm).measure(&BBox::new(0, 0, 800, 8000));
        assert_eq!(m.length, 4000.0);
        assert_eq!(m.piece_width, 400.0);
        assert_eq!(m.length_axis, LengthAxis::Vertical);
        assert_eq!(m.area, 400.0 * 4000.0);
        assert!(m.calibration_hint.is_none());

        let m = measurer(2.0, LengthUnit::Mm).measure(&BBox::new(0, 0, 7000, 800));
        assert_eq!(m.length, 3500.0);
        assert_eq!(m.length_axis, LengthAxis::Horizontal);
    }

    #[test]
    fn test_width_axis_only_when_paired_axis_is_farther() {
        // 400 mm vs 100 mm: 400 is closer to 4000, so it is the length
        let m = measurer(2.0, LengthUnit::Mm).measure(&BBox::new(0, 0, 800, 200));
        assert_eq!(m.length, 400.0);
        assert_eq!(m.length_axis, LengthAxis::Horizontal);
    }

    #[test]
    fn test_square_piece_takes_height_as_length() {
        let m = measurer(2.0, LengthUnit::Mm).measure(&BBox::new(0, 0, 600, 600));
        assert_eq!(m.length_axis, LengthAxis::Vertical);
        assert_eq!((m.length, m.piece_width), (300.0, 300.0));
    }

    #[test]
    fn test_units_propagate() {
        let m = measurer(1.0, LengthUnit::Cm).measure(&BBox::new(0, 0, 4000, 100));
        assert_eq!(m.unit, LengthUnit::Cm);
        assert_eq!(m.length, 400.0);
        assert_eq!(m.piece_width, 10.0);
    }

    #[test]
    fn test_broken_threshold() {
        let measurer = measurer(1.0, LengthUnit::Cm);
        let short = measurer.measure(&BBox::new(0, 0, 40, 20));
        assert!(measurer.is_broken(&short));
        let long = measurer.measure(&BBox::new(0, 0, 4000, 100));
        assert!(!measurer.is_broken(&long));

        let mut lenient = measurer.clone();
        lenient.detect_broken = false;
        assert!(!lenient.is_broken(&short));
    }

    #[test]
    fn test_calibration_hint() {
        let m = measurer(1.0, LengthUnit::Mm).measure(&BBox::new(0, 0, 800, 100));
        assert_eq!(m.calibration_hint, Some(0.2));
        assert_eq!(suggest_scale(0.0, 4000.0), None);
    }
}
