use nalgebra as na;

use crate::detection::Detection;

/// Fixed frame-rate factor converting a per-frame displacement into a
/// velocity.
const RATE: f64 = 10.0;
/// Empirical gain on the pixel-derived covariance.
const PIXEL_COV_GAIN: f64 = 100.0;

/// Result of the one-shot radial/tangential fusion.
#[derive(Debug, Clone, Copy)]
pub struct FusedVelocity {
    pub velocity: na::Vector3<f64>,
    pub covariance: na::Matrix3<f64>,
}

/// Lifts the observed pixel displacement of an object to a 3d velocity:
/// back-project the previous centroid through the pinhole model, move it by
/// the pixel displacement, re-project at the current centroid's depth and
/// difference in the global frame. The sensor's forward axis is x; the image
/// plane sees -y right and -z down.
fn pixel_velocity_3d(
    cur: &Detection,
    prev: &Detection,
    pix_vel: &na::Vector2<f64>,
    intrinsic: &na::Matrix3<f64>,
) -> na::Vector3<f64> {
    let cur_centroid = cur.centroid();
    let prev_centroid = prev.centroid();
    let prev_global = prev.global_pose.inverse() * na::Point3::from(prev_centroid);

    let (fx, fy) = (intrinsic[(0, 0)], intrinsic[(1, 1)]);
    let (ppx, ppy) = (intrinsic[(0, 2)], intrinsic[(1, 2)]);

    let u = (-prev_centroid.y * fx) / prev_centroid.x + ppx + pix_vel.x;
    let v = (-prev_centroid.z * fy) / prev_centroid.x + ppy + pix_vel.y;

    let depth = cur_centroid.x;
    let moved = na::Point3::new(depth, -(u - ppx) * depth / fx, -(v - ppy) * depth / fy);
    let moved_global = cur.global_pose.inverse() * moved;

    (moved_global - prev_global) * RATE
}

/// 3x3 covariance of the pixel-derived velocity: the pixel variance pushed
/// through the diagonal pixel-to-3d Jacobian, scaled by squared depth.
fn pixel_covariance_3d(
    depth: f64,
    pix_cov: &na::Matrix2<f64>,
    intrinsic: &na::Matrix3<f64>,
) -> na::Matrix3<f64> {
    let mut jac = na::Matrix3::identity();
    jac[(1, 1)] = depth / intrinsic[(0, 0)];
    jac[(2, 2)] = depth / intrinsic[(1, 1)];

    let mut cov = na::Matrix3::identity();
    cov[(1, 1)] = pix_cov[(0, 0)];
    cov[(2, 2)] = pix_cov[(1, 1)];

    PIXEL_COV_GAIN * depth * depth * jac * cov * jac.transpose()
}

/// Combines the point-cloud and image velocity cues in a radial/tangential
/// basis anchored at the sensor origin. The radial component trusts the
/// point-cloud cue unchanged; the tangential components are blended with the
/// covariance-weighted gain `Pc (Pc + Pp)^-1`.
pub fn fuse(
    cur: &Detection,
    prev: &Detection,
    points_vel: &na::Vector3<f64>,
    points_cov: &na::Matrix3<f64>,
    pix_vel: &na::Vector2<f64>,
    pix_cov: &na::Matrix2<f64>,
    intrinsic: &na::Matrix3<f64>,
) -> FusedVelocity {
    let cur_centroid = cur.centroid();

    let radial = match na::Unit::try_new(cur_centroid, 1e-9) {
        Some(radial) => radial,
        // object at the sensor origin: no line of sight to decompose along
        None => {
            return FusedVelocity {
                velocity: *points_vel,
                covariance: *points_cov,
            }
        }
    };

    let pix_vel_3d = pixel_velocity_3d(cur, prev, pix_vel, intrinsic);
    let pix_cov_3d = pixel_covariance_3d(cur_centroid.x, pix_cov, intrinsic);

    let point_radial = radial.into_inner() * points_vel.dot(&radial);
    let point_tangential = points_vel - point_radial;
    let pix_radial = radial.into_inner() * pix_vel_3d.dot(&radial);
    let pix_tangential = pix_vel_3d - pix_radial;

    let gain = match (points_cov + pix_cov_3d).try_inverse() {
        Some(inv) => points_cov * inv,
        // both cues fully degenerate; keep the point estimate
        None => na::Matrix3::zeros(),
    };

    // the gain is a full matrix, so the blend is projected back onto the
    // tangential subspace to keep the radial component exact
    let blended = point_tangential + gain * (pix_tangential - point_tangential);
    let tangential = blended - radial.into_inner() * blended.dot(&radial);

    FusedVelocity {
        velocity: point_radial + tangential,
        covariance: points_cov + gain * (pix_cov_3d + points_cov) * gain.transpose(),
    }
}
