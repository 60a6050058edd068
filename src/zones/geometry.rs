//! Point-in-polygon on normalized coordinates.

use crate::error::{ArgosError, Result};

/// Polygon with its bounding box precomputed, rebuilt whenever a zone's
/// vertices change.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedPolygon {
    vertices: Vec<(f64, f64)>,
    min: (f64, f64),
    max: (f64, f64),
}

impl PreparedPolygon {
    /// Validate and prepare a ring of normalized points.
    ///
    /// Rejects fewer than three vertices, non-finite or out-of-range
    /// coordinates, and rings with zero area.
    pub fn new(zone_id: &str, points: &[(f64, f64)]) -> Result<Self> {
        if points.len() < 3 {
            return Err(ArgosError::geometry(
                zone_id,
                format!("polygon needs at least 3 points, got {}", points.len()),
            ));
        }
        if let Some((i, p)) = points
            .iter()
            .enumerate()
            .find(|(_, (x, y))| !x.is_finite() || !y.is_finite())
        {
            return Err(ArgosError::geometry(
                zone_id,
                format!("point {} is not finite: {:?}", i, p),
            ));
        }
        if let Some((i, p)) = points
            .iter()
            .enumerate()
            .find(|(_, (x, y))| !(0.0..=1.0).contains(x) || !(0.0..=1.0).contains(y))
        {
            return Err(ArgosError::geometry(
                zone_id,
                format!("point {} is outside the normalized range 0..=1: {:?}", i, p),
            ));
        }
        if signed_area(points).abs() < f64::EPSILON {
            return Err(ArgosError::geometry(zone_id, "polygon has zero area"));
        }

        let mut min = (f64::MAX, f64::MAX);
        let mut max = (f64::MIN, f64::MIN);
        for &(x, y) in points {
            min = (min.0.min(x), min.1.min(y));
            max = (max.0.max(x), max.1.max(y));
        }
        Ok(Self {
            vertices: points.to_vec(),
            min,
            max,
        })
    }

    /// Even-odd ray casting. Points exactly on an edge may land either way.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        if x < self.min.0 || x > self.max.0 || y < self.min.1 || y > self.max.1 {
            return false;
        }
        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = self.vertices[i];
            let (xj, yj) = self.vertices[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    pub fn area(&self) -> f64 {
        signed_area(&self.vertices).abs()
    }
}

/// Shoelace formula.
fn signed_area(points: &[(f64, f64)]) -> f64 {
    let n = points.len();
    let mut sum = 0.0;
    for i in 0..n {
        let (x1, y1) = points[i];
        let (x2, y2) = points[(i + 1) % n];
        sum += x1 * y2 - x2 * y1;
    }
    sum / 2.0
}
