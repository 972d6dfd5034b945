use nalgebra as na;

use crate::detection::Detection;
use crate::viz::{ColoredPoint, Marker};

/// Sensor-frame length of the velocity arrows.
const ARROW_SCALE: f64 = 3.0;
/// Vertical offset of the speed label above the object centroid.
const LABEL_HEIGHT: f64 = 3.0;
const MPS_TO_KMH: f64 = 3.6;

/// Removes the sweep motion blur from an object cloud: every point moves
/// back along the velocity by its capture-time offset.
pub fn undistort_cloud(
    det: &Detection,
    velocity: &na::Vector3<f64>,
    color: [u8; 3],
) -> Vec<ColoredPoint> {
    det.points
        .iter()
        .map(|pt| ColoredPoint {
            position: na::Point3::from(pt.position() - velocity * pt.intensity),
            color,
        })
        .collect()
}

/// Fixed-length arrow from the object centroid along the velocity direction.
/// Near-zero velocities draw nothing.
pub fn velocity_arrow(id: u64, color: [u8; 3], det: &Detection, velocity: &na::Vector3<f64>) -> Option<Marker> {
    let dir = na::Unit::try_new(*velocity, 1e-9)?;
    let start = na::Point3::from(det.centroid());
    Some(Marker::Arrow {
        id,
        color,
        start,
        end: start + dir.into_inner() * ARROW_SCALE,
    })
}

/// Speed readout in km/h, floating above the object.
pub fn speed_label(id: u64, det: &Detection, velocity: &na::Vector3<f64>) -> Marker {
    let mut position = na::Point3::from(det.centroid());
    position.z += LABEL_HEIGHT;
    Marker::Text {
        id,
        position,
        text: format!("{:.1} km/h", velocity.norm() * MPS_TO_KMH),
    }
}
