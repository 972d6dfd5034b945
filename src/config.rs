use nalgebra as na;
use serde_derive::Deserialize;

/// Shi-Tomasi / Harris corner detector parameters for the optical-flow
/// feature stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureParams {
    pub max_corners: i32,
    pub quality_level: f64,
    pub min_distance: f64,
    pub block_size: i32,
    pub harris_k: f64,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            max_corners: 500,
            quality_level: 0.01,
            min_distance: 10.0,
            block_size: 3,
            harris_k: 0.04,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub features: FeatureParams,
    /// Row-major 3x3 pinhole intrinsic matrix.
    pub camera_intrinsic: [[f64; 3]; 3],
    /// Minimum IOU for an assignment to survive gating.
    pub iou_threshold: f64,
    /// Per-axis residual weights of the point-cloud motion optimizer.
    pub axis_weight: [f64; 3],
    /// Huber scale of the motion optimizer's robust loss.
    pub huber_scale: f64,
    /// Iteration cap of the motion optimizer.
    pub max_solver_iterations: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            features: FeatureParams::default(),
            camera_intrinsic: [
                [1000.0, 0.0, 640.0],
                [0.0, 1000.0, 360.0],
                [0.0, 0.0, 1.0],
            ],
            iou_threshold: 0.01,
            axis_weight: [1.0, 1.0, 1.0],
            huber_scale: 1.0,
            max_solver_iterations: 50,
        }
    }
}

impl Config {
    #[inline]
    pub fn intrinsic(&self) -> na::Matrix3<f64> {
        na::Matrix3::from_fn(|r, c| self.camera_intrinsic[r][c])
    }
}
