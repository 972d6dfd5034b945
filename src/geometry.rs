use nalgebra as na;
use opencv::core::{Point2f, RotatedRect, Size2f, Vector};
use opencv::imgproc;

use crate::detection::Detection;
use crate::error::Error;

/// Oriented rectangle in the horizontal plane; angle in degrees against the
/// reference axis (-1, 0).
#[derive(Debug, Clone, Copy)]
pub struct OrientedRect {
    pub center: Point2f,
    pub size: Size2f,
    pub angle: f32,
}

impl OrientedRect {
    #[inline]
    pub fn area(&self) -> f64 {
        self.size.width as f64 * self.size.height as f64
    }
}

/// Projects a detection footprint onto the horizontal plane: center is the
/// vertex mean, the sides are the vertex0-vertex1 and vertex0-vertex3 edges.
pub fn footprint_rect(det: &Detection) -> OrientedRect {
    let mut cx = 0.0;
    let mut cy = 0.0;
    for v in &det.footprint {
        cx += v.x;
        cy += v.y;
    }
    cx /= det.footprint.len() as f64;
    cy /= det.footprint.len() as f64;

    let v0 = &det.footprint[0];
    let v1 = &det.footprint[1];
    let v3 = &det.footprint[3];
    let width = ((v0.x - v1.x).powi(2) + (v0.y - v1.y).powi(2)).sqrt();
    let height = ((v0.x - v3.x).powi(2) + (v0.y - v3.y).powi(2)).sqrt();

    let edge = na::Vector2::new(v1.x - v0.x, v1.y - v0.y);
    let angle = match na::Unit::try_new(edge, 1e-9) {
        Some(edge) => {
            let base = na::Vector2::new(-1.0, 0.0);
            base.dot(&edge).clamp(-1.0, 1.0).acos().to_degrees()
        }
        // degenerate edge, fail closed
        None => 0.0,
    };

    OrientedRect {
        center: Point2f::new(cx as f32, cy as f32),
        size: Size2f::new(width as f32, height as f32),
        angle: angle as f32,
    }
}

/// Intersection-over-union of two oriented rectangles. The intersection
/// polygon comes from the OpenCV rotated-rectangle primitive; a small
/// epsilon keeps the denominator away from zero.
pub fn iou(a: &OrientedRect, b: &OrientedRect) -> Result<f64, Error> {
    let ra = RotatedRect::new(a.center, a.size, a.angle)?;
    let rb = RotatedRect::new(b.center, b.size, b.angle)?;

    let mut region = Vector::<Point2f>::new();
    imgproc::rotated_rectangle_intersection(&ra, &rb, &mut region)?;
    if region.is_empty() {
        return Ok(0.0);
    }

    let mut hull = Vector::<Point2f>::new();
    imgproc::convex_hull(&region, &mut hull, true, true)?;
    let inter = imgproc::contour_area(&hull, false)?;

    Ok(inter / (a.area() + b.area() - inter + 1e-4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rect(cx: f32, cy: f32, w: f32, h: f32, angle: f32) -> OrientedRect {
        OrientedRect {
            center: Point2f::new(cx, cy),
            size: Size2f::new(w, h),
            angle,
        }
    }

    #[test]
    fn iou_of_identical_rects_is_one() {
        let a = rect(0.0, 0.0, 2.0, 2.0, 0.0);
        let v = iou(&a, &a).unwrap();
        assert_relative_eq!(v, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn iou_of_disjoint_rects_is_zero() {
        let a = rect(0.0, 0.0, 2.0, 2.0, 0.0);
        let b = rect(10.0, 10.0, 2.0, 2.0, 0.0);
        assert_eq!(iou(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = rect(0.0, 0.0, 2.0, 2.0, 0.0);
        let b = rect(1.0, 0.0, 2.0, 2.0, 0.0);
        // intersection 2, union 6
        assert_relative_eq!(iou(&a, &b).unwrap(), 1.0 / 3.0, epsilon = 1e-3);
    }

    #[test]
    fn iou_stays_in_unit_interval() {
        let rects = [
            rect(0.0, 0.0, 2.0, 3.0, 0.0),
            rect(0.5, 0.5, 1.0, 4.0, 30.0),
            rect(-1.0, 2.0, 3.0, 0.5, 120.0),
            rect(0.0, 0.0, 0.1, 0.1, 45.0),
        ];
        for a in &rects {
            for b in &rects {
                let v = iou(a, b).unwrap();
                assert!((0.0..=1.0).contains(&v), "iou out of range: {v}");
            }
        }
    }
}
