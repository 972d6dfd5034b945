use nalgebra as na;

/// One LiDAR return. The upstream pipeline reuses `intensity` as the
/// relative capture-time offset of the point within the sweep, which is what
/// makes motion compensation possible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: f64,
}

impl CloudPoint {
    #[inline]
    pub fn position(&self) -> na::Vector3<f64> {
        na::Vector3::new(self.x, self.y, self.z)
    }
}

/// Axis-aligned image-space rectangle, left-top corner plus size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect2d {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect2d {
    #[inline]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }
}

/// One perceived object in the current frame, produced by the upstream
/// perception stage and consumed read-only here. Shared between the tracker
/// and its tracks via `Rc`.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Object point cloud, ordered as captured.
    pub points: Vec<CloudPoint>,
    /// Eight ordered vertices of the oriented 3d box. Vertex 0 sits at a
    /// half-extent corner; vertices 1 and 3 are its neighbors along the two
    /// base edges.
    pub footprint: [na::Point3<f64>; 8],
    /// Image-space projection of the object.
    pub rect2d: Rect2d,
    /// Rigid transform from the sensor frame to a global frame.
    pub global_pose: na::Isometry3<f64>,
    /// Confidence of the detection; zero or below marks it expired.
    pub confidence: f64,
}

impl Detection {
    /// Mean of the footprint vertices.
    pub fn centroid(&self) -> na::Vector3<f64> {
        let mut c = na::Vector3::zeros();
        for v in &self.footprint {
            c += v.coords;
        }
        c / self.footprint.len() as f64
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.confidence > 0.0
    }
}
