//! Region of interest

use linegate_core::{Point, RoiConfig};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Roi {
    /// Inclusive pixel rectangle
    Rect { x1: i32, y1: i32, x2: i32, y2: i32 },
    /// Closed polygon; points on the edge count as inside
    Polygon(Vec<Point>),
}

impl Roi {
    /// Full-height vertical band centred on the frame (shifted by `offset`)
    /// covering `scale` of the frame width.
    pub fn vertical_band(width: u32, height: u32, scale: f64, offset: f64) -> Roi {
        let w = width as i32;
        let h = height as i32;
        let scale = scale.clamp(RoiConfig::MIN_SCALE, RoiConfig::MAX_SCALE);
        let offset = offset.clamp(-RoiConfig::MAX_OFFSET, RoiConfig::MAX_OFFSET);

        let band = (scale * width as f64) as i32;
        let center = (width as f64 / 2.0 + offset * width as f64) as i32;
        let x1 = (center - band / 2).max(0).min(w - band).max(0);
        let x2 = (x1 + band).min(w - 1);

        Roi::Rect {
            x1,
            y1: 0,
            x2,
            y2: (h - 1).max(0),
        }
    }

    /// ROI for a frame of the given size
    pub fn from_config(config: &RoiConfig, width: u32, height: u32) -> Roi {
        if config.polygon.len() >= 3 {
            Roi::Polygon(config.polygon.iter().map(|p| Point::new(p[0], p[1])).collect())
        } else {
            Roi::vertical_band(width, height, config.scale, config.offset)
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        match self {
            Roi::Rect { x1, y1, x2, y2 } => {
                point.x >= *x1 as f64 && point.x <= *x2 as f64 && point.y >= *y1 as f64 && point.y <= *y2 as f64
            }
            Roi::Polygon(points) => polygon_contains(points, point),
        }
    }
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    const EPS: f64 = 1e-9;
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() > EPS * (1.0 + (b.x - a.x).abs() + (b.y - a.y).abs()) {
        return false;
    }
    p.x >= a.x.min(b.x) - EPS && p.x <= a.x.max(b.x) + EPS && p.y >= a.y.min(b.y) - EPS && p.y <= a.y.max(b.y) + EPS
}

fn polygon_contains(points: &[Point], p: Point) -> bool {
    if points.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (a, b) = (points[i], points[j]);
        if on_segment(a, b, p) {
            return true;
        }
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_band() {
        let roi = Roi::vertical_band(1280, 720, 0.40, 0.0);
        assert_eq!(
            roi,
            Roi::Rect {
                x1: 384,
                y1: 0,
                x2: 896,
                y2: 719
            }
        );
    }

    #[test]
    fn test_band_offset_is_clamped_to_frame() {
        let roi = Roi::vertical_band(1000, 500, 0.90, 0.45);
        assert_eq!(
            roi,
            Roi::Rect {
                x1: 100,
                y1: 0,
                x2: 999,
                y2: 499
            }
        );

        let roi = Roi::vertical_band(1000, 500, 0.5, -5.0);
        match roi {
            Roi::Rect { x1, x2, .. } => {
                assert_eq!(x1, 0);
                assert_eq!(x2, 500);
            }
            other => panic!("unexpected roi {:?}", other),
        }
    }

    #[test]
    fn test_rect_edges_are_inside() {
        let roi = Roi::vertical_band(1280, 720, 0.40, 0.0);
        assert!(roi.contains(Point::new(384.0, 0.0)));
        assert!(roi.contains(Point::new(896.0, 719.0)));
        assert!(!roi.contains(Point::new(383.5, 10.0)));
        assert!(!roi.contains(Point::new(900.0, 10.0)));
    }

    #[test]
    fn test_polygon_contains() {
        let config = RoiConfig {
            polygon: vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]],
            ..RoiConfig::default()
        };
        let roi = Roi::from_config(&config, 1280, 720);
        assert!(roi.contains(Point::new(50.0, 50.0)));
        assert!(roi.contains(Point::new(100.0, 50.0)));
        assert!(roi.contains(Point::new(0.0, 0.0)));
        assert!(!roi.contains(Point::new(101.0, 50.0)));
        assert!(!roi.contains(Point::new(-1.0, -1.0)));
    }

    #[test]
    fn test_concave_polygon() {
        let roi = Roi::Polygon(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(5.0, 5.0),
            Point::new(0.0, 10.0),
        ]);
        assert!(roi.contains(Point::new(5.0, 2.0)));
        assert!(!roi.contains(Point::new(5.0, 8.0)));
    }

    #[test]
    fn test_short_polygon_falls_back_to_band() {
        let config = RoiConfig {
            polygon: vec![[0.0, 0.0], [10.0, 10.0]],
            ..RoiConfig::default()
        };
        assert!(matches!(Roi::from_config(&config, 640, 480), Roi::Rect { .. }));
    }
}
