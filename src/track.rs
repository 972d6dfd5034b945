use std::rc::Rc;

use nalgebra as na;

use crate::detection::Detection;
use crate::kalman::{KalmanFilter, StateVector};

/// Persistent hypothesis for one physical object, wrapping the Kalman
/// filter and its association bookkeeping.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    pub age: u32,
    pub hits: u32,
    pub hit_streak: u32,
    pub time_since_update: u32,
    /// Fused velocity carried into the next frame as a direction prior.
    pub estimated_velocity: na::Vector3<f64>,
    /// Cosmetic tag, stable per id.
    pub color: [u8; 3],
    filter: KalmanFilter,
    detection: Rc<Detection>,
}

/// Derives the 7-component geometric measurement from a detection footprint:
/// centroid, the bearing-style yaw of the centroid direction, and twice the
/// vertex-0 offset from the centroid per axis.
///
/// The yaw is a positional bearing, not a true object heading; the formula
/// is kept as the upstream detector defines it.
pub fn measurement(det: &Detection) -> [f64; 7] {
    let c = det.centroid();
    let yaw = (c.y / (c.x * c.x + c.y * c.y).sqrt()).acos();
    let v0 = &det.footprint[0];
    let length = (2.0 * (v0.x - c.x)).abs();
    let width = (2.0 * (v0.y - c.y)).abs();
    let height = (2.0 * (v0.z - c.z)).abs();

    [c.x, c.y, c.z, yaw, length, width, height]
}

fn color_for(id: u64) -> [u8; 3] {
    let h = id.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    [(h >> 16) as u8, (h >> 32) as u8, (h >> 48) as u8]
}

impl Track {
    /// Initializes the filter state from a detection. Ids are handed out by
    /// the orchestrator's allocator.
    pub fn new(id: u64, detection: Rc<Detection>) -> Self {
        let m = measurement(&detection);

        Self {
            id,
            age: 0,
            hits: 1,
            hit_streak: 0,
            time_since_update: 0,
            estimated_velocity: na::Vector3::zeros(),
            color: color_for(id),
            filter: KalmanFilter::new(&m),
            detection,
        }
    }

    /// Advances the motion model one frame and updates the counters.
    ///
    /// Returns the last associated detection: the geometric outline used for
    /// association is not re-derived from the advanced state vector, so IOU
    /// always compares against geometry one frame behind the filter's own
    /// motion model. Known limitation.
    pub fn predict(&mut self) -> Rc<Detection> {
        self.filter.predict();
        self.age += 1;

        if self.time_since_update > 0 {
            self.hit_streak = 0;
        }
        self.time_since_update += 1;

        self.detection.clone()
    }

    /// Correction step with the matched detection and the fused velocity
    /// estimate. The velocity covariance replaces the corresponding
    /// measurement-noise block before correcting.
    pub fn update(
        &mut self,
        detection: Rc<Detection>,
        velocity: &na::Vector3<f64>,
        velocity_cov: &na::Matrix3<f64>,
    ) {
        self.time_since_update = 0;
        self.hits += 1;
        self.hit_streak += 1;

        let m = measurement(&detection);
        let mut z = StateVector::zeros();
        for (i, v) in m.iter().enumerate() {
            z[i] = *v;
        }
        z[7] = velocity.x;
        z[8] = velocity.y;
        z[9] = velocity.z;

        self.filter.set_velocity_noise(velocity_cov);
        self.filter.correct(&z);

        self.detection = detection;
    }

    /// Velocity sub-state; meaningful after `update`.
    #[inline]
    pub fn velocity(&self) -> na::Vector3<f64> {
        self.filter.velocity()
    }

    #[inline]
    pub fn set_estimated_velocity(&mut self, velocity: na::Vector3<f64>) {
        self.estimated_velocity = velocity;
    }

    /// Last detection used to initialize or update this track.
    #[inline]
    pub fn detection(&self) -> &Rc<Detection> {
        &self.detection
    }
}
