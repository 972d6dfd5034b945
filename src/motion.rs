use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra as na;
use nalgebra::storage::Owned;
use nalgebra::{Dyn, U1};
use tracing::debug;

use crate::config::Config;
use crate::detection::{CloudPoint, Detection};

/// Angle below which the carried-forward velocity prior overrides the
/// geometric direction hypothesis, in degrees.
const PRIOR_ANGLE_DEG: f64 = 20.0;

/// Point-based velocity estimate and its diagonal covariance, each entry the
/// scalar's marginal variance scaled by the squared velocity component.
#[derive(Debug, Clone, Copy)]
pub struct PointVelocity {
    pub velocity: na::Vector3<f64>,
    pub covariance: na::Matrix3<f64>,
}

/// Picks the motion-direction hypothesis for a detection: the longer of the
/// two footprint edges at vertex 0. A carried prior with any nonzero
/// component replaces it when the two directions agree within 20 degrees.
/// Degenerate footprints yield no hypothesis.
fn direction_hypothesis(
    det: &Detection,
    prior: &na::Vector3<f64>,
) -> Option<na::Unit<na::Vector3<f64>>> {
    let v0 = det.footprint[0].coords;
    let side_a = v0 - det.footprint[3].coords;
    let side_b = v0 - det.footprint[1].coords;
    let edge = if side_a.norm() > side_b.norm() {
        side_a
    } else {
        side_b
    };
    let dir = na::Unit::try_new(edge, 1e-9)?;

    let prior_valid = prior.x != 0.0 || prior.y != 0.0 || prior.z != 0.0;
    if prior_valid {
        let cos = (dir.dot(prior) / prior.norm()).clamp(-1.0, 1.0);
        if cos.acos().to_degrees().abs() < PRIOR_ANGLE_DEG {
            return na::Unit::try_new(*prior, 1e-9);
        }
    }

    Some(dir)
}

/// One-parameter least-squares problem: scale a unit motion direction so
/// that compensating every point by `direction * scale * intensity`
/// collapses the cloud's motion blur. Residuals are the squared distances of
/// the compensated point to the direction line and two orthogonal axes,
/// Huber-damped.
struct MotionProblem<'a> {
    points: &'a [CloudPoint],
    centroid: na::Vector3<f64>,
    direction: na::Vector3<f64>,
    /// Unit projection axes; a degenerate third axis (direction parallel to
    /// z) is zeroed and contributes nothing.
    axes: [na::Vector3<f64>; 3],
    axis_weight: [f64; 3],
    huber_scale: f64,
    scale: f64,
}

impl<'a> MotionProblem<'a> {
    fn new(
        points: &'a [CloudPoint],
        centroid: na::Vector3<f64>,
        direction: na::Vector3<f64>,
        config: &Config,
    ) -> Self {
        let base2 = na::Vector3::z();
        let base3 = base2.cross(&direction);
        let base3 = na::Unit::try_new(base3, 1e-9)
            .map(|u| u.into_inner())
            .unwrap_or_else(na::Vector3::zeros);

        Self {
            points,
            centroid,
            direction,
            axes: [direction, base2, base3],
            axis_weight: config.axis_weight,
            huber_scale: config.huber_scale,
            scale: 1.0,
        }
    }

    /// Signed projection of the compensated offset onto each axis and its
    /// derivative with respect to the scale parameter.
    fn projections(&self, pt: &CloudPoint) -> [(f64, f64); 3] {
        let compensated = pt.position() - self.direction * (self.scale * pt.intensity);
        let offset = compensated - self.centroid;

        let mut out = [(0.0, 0.0); 3];
        for (axis, slot) in self.axes.iter().zip(out.iter_mut()) {
            let a = axis.dot(&offset);
            let da = -pt.intensity * axis.dot(&self.direction);
            *slot = (a, da);
        }
        out
    }

    #[inline]
    fn huber_weight(&self, residual: f64) -> f64 {
        let abs = residual.abs();
        if abs <= self.huber_scale {
            1.0
        } else {
            (self.huber_scale / abs).sqrt()
        }
    }
}

impl LeastSquaresProblem<f64, Dyn, U1> for MotionProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, U1>;
    type ParameterStorage = Owned<f64, U1>;

    fn set_params(&mut self, params: &na::Vector1<f64>) {
        self.scale = params[0];
    }

    fn params(&self) -> na::Vector1<f64> {
        na::Vector1::new(self.scale)
    }

    fn residuals(&self) -> Option<na::DVector<f64>> {
        let n = self.points.len() as f64;
        let mut r = na::DVector::zeros(3 * self.points.len());
        for (k, pt) in self.points.iter().enumerate() {
            for (axis, (a, _)) in self.projections(pt).into_iter().enumerate() {
                let raw = self.axis_weight[axis] * a * a / n;
                r[3 * k + axis] = self.huber_weight(raw) * raw;
            }
        }
        Some(r)
    }

    fn jacobian(&self) -> Option<na::OMatrix<f64, Dyn, U1>> {
        let n = self.points.len() as f64;
        let mut j = na::OMatrix::<f64, Dyn, U1>::zeros(3 * self.points.len());
        for (k, pt) in self.points.iter().enumerate() {
            for (axis, (a, da)) in self.projections(pt).into_iter().enumerate() {
                let raw = self.axis_weight[axis] * a * a / n;
                let draw = 2.0 * self.axis_weight[axis] * a * da / n;
                j[3 * k + axis] = self.huber_weight(raw) * draw;
            }
        }
        Some(j)
    }
}

/// Solves the motion-direction scaling problem for a matched detection pair.
/// Returns `None` when either cloud is empty or no direction hypothesis
/// exists.
pub fn estimate(
    prev: &Detection,
    cur: &Detection,
    prior: &na::Vector3<f64>,
    config: &Config,
) -> Option<PointVelocity> {
    if prev.points.is_empty() || cur.points.is_empty() {
        return None;
    }

    let direction = direction_hypothesis(cur, prior)?;
    let problem = MotionProblem::new(
        &cur.points,
        cur.centroid(),
        direction.into_inner(),
        config,
    );

    let (solved, report) = LevenbergMarquardt::new()
        .with_patience(config.max_solver_iterations)
        .minimize(problem);
    if !report.termination.was_successful() {
        debug!(
            termination = ?report.termination,
            "motion solve did not converge, keeping best-effort scale"
        );
    }

    let velocity = direction.into_inner() * solved.scale;

    // marginal variance of the scale from the Gauss-Newton approximation;
    // a flat problem degrades to zero variance
    let variance = solved
        .jacobian()
        .map(|j| {
            let jtj = (j.transpose() * &j)[(0, 0)];
            if jtj > 1e-12 {
                1.0 / jtj
            } else {
                0.0
            }
        })
        .unwrap_or(0.0);

    let mut covariance = na::Matrix3::zeros();
    for i in 0..3 {
        covariance[(i, i)] = variance.abs() * velocity[i] * velocity[i];
    }

    Some(PointVelocity {
        velocity,
        covariance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Rect2d;
    use approx::assert_relative_eq;

    /// Box with its long edge along x, blurred along that edge with the
    /// given per-intensity speed.
    fn smeared_box(speed: f64) -> Detection {
        let centroid = na::Vector3::new(10.0, 2.0, 0.5);
        let (cx, cy, cz) = (centroid.x, centroid.y, centroid.z);
        let footprint = [
            na::Point3::new(cx + 2.0, cy + 0.5, cz - 0.5),
            na::Point3::new(cx - 2.0, cy + 0.5, cz - 0.5),
            na::Point3::new(cx - 2.0, cy - 0.5, cz - 0.5),
            na::Point3::new(cx + 2.0, cy - 0.5, cz - 0.5),
            na::Point3::new(cx + 2.0, cy + 0.5, cz + 0.5),
            na::Point3::new(cx - 2.0, cy + 0.5, cz + 0.5),
            na::Point3::new(cx - 2.0, cy - 0.5, cz + 0.5),
            na::Point3::new(cx + 2.0, cy - 0.5, cz + 0.5),
        ];

        let mut points = Vec::new();
        for k in 0..40 {
            let t = k as f64 / 40.0;
            points.push(CloudPoint {
                x: cx + speed * t,
                y: cy,
                z: cz,
                intensity: t,
            });
        }

        Detection {
            points,
            footprint,
            rect2d: Rect2d::new(0.0, 0.0, 10.0, 10.0),
            global_pose: na::Isometry3::identity(),
            confidence: 1.0,
        }
    }

    #[test]
    fn recovers_motion_scale_from_blur() {
        let det = smeared_box(2.0);
        let out = estimate(&det, &det, &na::Vector3::zeros(), &Config::default()).unwrap();
        // direction hypothesis is the long x edge (possibly flipped)
        assert_relative_eq!(out.velocity.x.abs(), 2.0, epsilon = 1e-3);
        assert_relative_eq!(out.velocity.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(out.velocity.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn stationary_cloud_yields_near_zero_velocity() {
        let det = smeared_box(0.0);
        let out = estimate(&det, &det, &na::Vector3::zeros(), &Config::default()).unwrap();
        assert!(out.velocity.norm() < 1e-3);
    }

    #[test]
    fn empty_cloud_skips_estimation() {
        let mut det = smeared_box(1.0);
        det.points.clear();
        assert!(estimate(&det, &det, &na::Vector3::zeros(), &Config::default()).is_none());
    }

    #[test]
    fn aligned_prior_overrides_edge_direction() {
        let det = smeared_box(1.0);
        // 10 degrees off the x axis, inside the 20 degree gate
        let prior = na::Vector3::new(
            10f64.to_radians().cos(),
            10f64.to_radians().sin(),
            0.0,
        );
        let out = estimate(&det, &det, &prior, &Config::default()).unwrap();
        let dir = out.velocity.normalize();
        let cos = dir.dot(&prior).abs();
        assert_relative_eq!(cos, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn orthogonal_prior_is_ignored() {
        let det = smeared_box(1.0);
        let prior = na::Vector3::new(0.0, 5.0, 0.0);
        let out = estimate(&det, &det, &prior, &Config::default()).unwrap();
        let dir = out.velocity.normalize();
        assert_relative_eq!(dir.x.abs(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn covariance_is_diagonal_and_nonnegative() {
        let det = smeared_box(2.0);
        let out = estimate(&det, &det, &na::Vector3::zeros(), &Config::default()).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                if i == j {
                    assert!(out.covariance[(i, j)] >= 0.0);
                } else {
                    assert_eq!(out.covariance[(i, j)], 0.0);
                }
            }
        }
    }
}
