use nalgebra as na;

pub const STATE_DIM: usize = 10;

/// Frame step encoded in the transition matrix; positions integrate
/// velocity with this fixed dt.
const DT: f64 = 0.1;

pub type StateVector = na::SVector<f64, STATE_DIM>;
type StateMatrix = na::SMatrix<f64, STATE_DIM, STATE_DIM>;

/// Linear Kalman filter over the track state
/// `[x, y, z, yaw, length, width, height, vx, vy, vz]` with a
/// constant-velocity transition and a full-state measurement.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    x: StateVector,
    p: StateMatrix,
    f: StateMatrix,
    q: StateMatrix,
    r: StateMatrix,
}

impl KalmanFilter {
    /// Seeds the filter with the 7-component geometric measurement; the
    /// velocity sub-state starts at zero.
    pub fn new(initial: &[f64; 7]) -> Self {
        let mut f = StateMatrix::identity();
        f[(0, 7)] = DT;
        f[(1, 8)] = DT;
        f[(2, 9)] = DT;

        let mut x = StateVector::zeros();
        for (i, v) in initial.iter().enumerate() {
            x[i] = *v;
        }

        Self {
            x,
            p: StateMatrix::identity(),
            f,
            q: StateMatrix::identity() * 1e-2,
            r: StateMatrix::identity() * 1e-1,
        }
    }

    /// Time update: x' = Fx, P' = FPF' + Q.
    pub fn predict(&mut self) {
        self.x = self.f * self.x;
        self.p = self.f * self.p * self.f.transpose() + self.q;
    }

    /// Installs a velocity measurement covariance into the matching block of
    /// the measurement noise.
    pub fn set_velocity_noise(&mut self, cov: &na::Matrix3<f64>) {
        self.r.fixed_view_mut::<3, 3>(7, 7).copy_from(cov);
    }

    /// Measurement update with the full-state observation `z`. A singular
    /// innovation covariance leaves the state untouched.
    pub fn correct(&mut self, z: &StateVector) {
        let s = self.p + self.r;
        let s_inv = if let Some(inv) = s.try_inverse() {
            inv
        } else {
            tracing::debug!("singular innovation covariance, skipping correction");
            return;
        };

        let k = self.p * s_inv;
        self.x += k * (z - self.x);
        self.p = (StateMatrix::identity() - k) * self.p;
    }

    #[inline]
    pub fn state(&self) -> &StateVector {
        &self.x
    }

    #[inline]
    pub fn velocity(&self) -> na::Vector3<f64> {
        na::Vector3::new(self.x[7], self.x[8], self.x[9])
    }
}
