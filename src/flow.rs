use std::rc::Rc;

use nalgebra as na;
use opencv::calib3d;
use opencv::core::{self, Mat, Point2f, Size, TermCriteria, Vector};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::video;
use tracing::debug;

use crate::config::{Config, FeatureParams};
use crate::detection::Detection;
use crate::error::Error;

/// Fundamental-matrix RANSAC needs at least this many correspondences.
const MIN_RANSAC_POINTS: usize = 8;

/// Per-object pixel-velocity estimate: mean displacement of the RANSAC
/// inliers and its diagonal 2x2 covariance. Objects without inliers keep the
/// zero default.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelVelocity {
    pub mean: na::Vector2<f64>,
    pub covariance: na::Matrix2<f64>,
}

/// Feature state carried between consecutive calls so the previous frame is
/// not re-detected when frames arrive in immediate sequence.
#[derive(Default)]
pub struct FlowState {
    prev_gray: Option<Mat>,
    prev_pts: Vector<Point2f>,
}

/// Sparse optical-flow velocity estimator over the matched objects of one
/// frame pair.
#[derive(Default)]
pub struct FlowEstimator {
    state: FlowState,
}

/// Index of the first detection whose image rectangle contains the point.
fn attribute(px: f64, py: f64, dets: &[Rc<Detection>]) -> Option<usize> {
    dets.iter().position(|d| d.rect2d.contains(px, py))
}

fn attribute_features(features: &Vector<Point2f>, dets: &[Rc<Detection>]) -> Vector<Point2f> {
    let mut kept = Vector::new();
    for pt in features.iter() {
        if attribute(pt.x as f64, pt.y as f64, dets).is_some() {
            kept.push(pt);
        }
    }
    kept
}

fn to_gray(img: &Mat) -> Result<Mat, Error> {
    if img.channels() == 1 {
        return Ok(img.clone());
    }
    let mut gray = Mat::default();
    imgproc::cvt_color(img, &mut gray, imgproc::COLOR_RGB2GRAY, 0)?;
    Ok(gray)
}

fn detect_features(gray: &Mat, params: &FeatureParams) -> Result<Vector<Point2f>, Error> {
    let mut corners = Vector::<Point2f>::new();
    imgproc::good_features_to_track(
        gray,
        &mut corners,
        params.max_corners,
        params.quality_level,
        params.min_distance,
        &core::no_array(),
        params.block_size,
        false,
        params.harris_k,
    )?;
    Ok(corners)
}

impl FlowEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produces one pixel-velocity estimate per matched object pair.
    /// `prev_dets` and `cur_dets` are the matched tracks' last detections
    /// and the matched current detections, in pair order.
    pub fn estimate(
        &mut self,
        prev_img: &Mat,
        cur_img: &Mat,
        prev_dets: &[Rc<Detection>],
        cur_dets: &[Rc<Detection>],
        config: &Config,
    ) -> Result<Vec<PixelVelocity>, Error> {
        let obj_num = prev_dets.len();
        let mut out = vec![PixelVelocity::default(); obj_num];

        let cur_gray = to_gray(cur_img)?;

        // previous-frame features: carried over when the last call already
        // saw this pair's first frame, freshly detected otherwise
        let (prev_gray, mut tracked_prev) = match self.state.prev_gray.take() {
            Some(gray) if !self.state.prev_pts.is_empty() => {
                (gray, std::mem::take(&mut self.state.prev_pts))
            }
            _ => {
                let gray = to_gray(prev_img)?;
                let features = detect_features(&gray, &config.features)?;
                let attributed = attribute_features(&features, prev_dets);
                (gray, attributed)
            }
        };

        let tracked_cur =
            attribute_features(&detect_features(&cur_gray, &config.features)?, cur_dets);

        if tracked_cur.is_empty() {
            debug!("no trackable features inside object rectangles");
            self.state.prev_pts = tracked_cur;
            self.state.prev_gray = Some(cur_gray);
            return Ok(out);
        }

        // track current features back into the previous frame
        let mut status = Vector::<u8>::new();
        let mut err = Vector::<f32>::new();
        video::calc_optical_flow_pyr_lk(
            &cur_gray,
            &prev_gray,
            &tracked_cur,
            &mut tracked_prev,
            &mut status,
            &mut err,
            Size::new(20, 20),
            3,
            TermCriteria::new(core::TermCriteria_Type::COUNT as i32 + core::TermCriteria_Type::EPS as i32, 30, 0.01)?,
            0,
            1e-4,
        )?;

        // attribute survivors to objects by their previous-frame position
        let mut obj_prev: Vec<Vec<Point2f>> = vec![Vec::new(); obj_num];
        let mut obj_cur: Vec<Vec<Point2f>> = vec![Vec::new(); obj_num];
        for i in 0..tracked_cur.len() {
            if status.get(i)? != 1 {
                continue;
            }
            let p = tracked_prev.get(i)?;
            if let Some(obj) = attribute(p.x as f64, p.y as f64, prev_dets) {
                obj_prev[obj].push(p);
                obj_cur[obj].push(tracked_cur.get(i)?);
            }
        }

        for obj in 0..obj_num {
            if obj_prev[obj].len() < MIN_RANSAC_POINTS {
                continue;
            }

            let prev_pts: Vector<Point2f> = obj_prev[obj].iter().copied().collect();
            let cur_pts: Vector<Point2f> = obj_cur[obj].iter().copied().collect();
            let mut inlier_mask = Vector::<u8>::new();
            calib3d::find_fundamental_mat(
                &prev_pts,
                &cur_pts,
                calib3d::FM_RANSAC,
                3.0,
                0.99,
                1000,
                &mut inlier_mask,
            )?;

            let mut displacements = Vec::new();
            let mut mean = na::Vector2::zeros();
            for k in 0..inlier_mask.len() {
                if inlier_mask.get(k)? == 0 {
                    continue;
                }
                let p = obj_prev[obj][k];
                let c = obj_cur[obj][k];
                let d = na::Vector2::new((c.x - p.x) as f64, (c.y - p.y) as f64);
                mean += d;
                displacements.push(d);
            }
            if displacements.is_empty() {
                continue;
            }

            let n = displacements.len() as f64;
            mean /= n;
            let mut cov = na::Matrix2::zeros();
            for d in &displacements {
                cov[(0, 0)] += (d.x - mean.x).powi(2) / n;
                cov[(1, 1)] += (d.y - mean.y).powi(2) / n;
            }

            out[obj] = PixelVelocity {
                mean,
                covariance: cov,
            };
        }

        self.state.prev_pts = tracked_cur;
        self.state.prev_gray = Some(cur_gray);

        Ok(out)
    }
}
