use std::rc::Rc;

use nalgebra as na;
use opencv::core::Mat;
use tracing::{debug, info};

use crate::assignment;
use crate::config::Config;
use crate::detection::Detection;
use crate::error::Error;
use crate::flow::{FlowEstimator, PixelVelocity};
use crate::fusion::{self, FusedVelocity};
use crate::geometry;
use crate::motion;
use crate::track::Track;
use crate::undistort;
use crate::viz::{ColoredCloud, Marker, Publisher};

/// Per-frame orchestrator: association, the velocity estimators, the fusion
/// step and the debug output all run from here.
pub struct FusionTracker {
    config: Config,
    tracks: Vec<Track>,
    next_id: u64,
    flow: FlowEstimator,
    last_image: Option<Mat>,
    total_frames: u64,
}

impl FusionTracker {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 0,
            flow: FlowEstimator::new(),
            last_image: None,
            total_frames: 0,
        }
    }

    #[inline]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    #[inline]
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn spawn(&mut self, detection: Rc<Detection>) {
        let id = self.next_id;
        self.next_id += 1;
        debug!(id, "new track");
        self.tracks.push(Track::new(id, detection));
    }

    /// Consumes one synchronized frame: the detections of the sweep and the
    /// camera image it overlaps with.
    pub fn track(
        &mut self,
        detections: &[Rc<Detection>],
        image: &Mat,
        publisher: &mut dyn Publisher,
    ) -> Result<(), Error> {
        self.total_frames += 1;

        // first populated frame seeds the track set, nothing to estimate yet
        if self.tracks.is_empty() {
            for det in detections {
                if det.is_valid() {
                    self.spawn(det.clone());
                }
            }
            self.last_image = Some(image.clone());
            return Ok(());
        }

        self.tracks.retain(|t| {
            if t.detection().is_valid() {
                true
            } else {
                info!(id = t.id, age = t.age, "dropping expired track");
                false
            }
        });

        let predicted: Vec<Rc<Detection>> = self.tracks.iter_mut().map(Track::predict).collect();

        let mut cost = Vec::with_capacity(predicted.len());
        for pred in &predicted {
            let rect = geometry::footprint_rect(pred);
            let mut row = Vec::with_capacity(detections.len());
            for det in detections {
                row.push(1.0 - geometry::iou(&rect, &geometry::footprint_rect(det))?);
            }
            cost.push(row);
        }

        let assoc = assignment::associate(&cost, detections.len(), self.config.iou_threshold);

        for det_idx in &assoc.unmatched_detections {
            if detections[*det_idx].is_valid() {
                self.spawn(detections[*det_idx].clone());
            }
        }

        // matched pairs, previous geometry taken before any update
        let prev_dets: Vec<Rc<Detection>> = assoc
            .matched
            .iter()
            .map(|&(trk, _)| self.tracks[trk].detection().clone())
            .collect();
        let cur_dets: Vec<Rc<Detection>> = assoc
            .matched
            .iter()
            .map(|&(_, det)| detections[det].clone())
            .collect();

        let pixel_velocities = match &self.last_image {
            Some(prev_image) => {
                self.flow
                    .estimate(prev_image, image, &prev_dets, &cur_dets, &self.config)?
            }
            None => vec![PixelVelocity::default(); assoc.matched.len()],
        };

        publisher.publish_marker(&Marker::Clear);

        let intrinsic = self.config.intrinsic();
        let mut cloud = ColoredCloud::default();
        let mut markers = Vec::new();

        for (k, &(trk_idx, _)) in assoc.matched.iter().enumerate() {
            let prev = &prev_dets[k];
            let cur = &cur_dets[k];
            let prior = self.tracks[trk_idx].estimated_velocity;

            let fused = match motion::estimate(prev, cur, &prior, &self.config) {
                Some(pv) => fusion::fuse(
                    cur,
                    prev,
                    &pv.velocity,
                    &pv.covariance,
                    &pixel_velocities[k].mean,
                    &pixel_velocities[k].covariance,
                    &intrinsic,
                ),
                // no usable point cue, carry the last estimate forward
                None => {
                    debug!(id = self.tracks[trk_idx].id, "no point cue, carrying velocity");
                    FusedVelocity {
                        velocity: prior,
                        covariance: na::Matrix3::identity(),
                    }
                }
            };

            let track = &mut self.tracks[trk_idx];
            track.update(cur.clone(), &fused.velocity, &fused.covariance);
            let velocity = track.velocity();
            track.set_estimated_velocity(velocity);

            cloud
                .points
                .extend(undistort::undistort_cloud(cur, &velocity, track.color));
            if let Some(arrow) = undistort::velocity_arrow(track.id, track.color, cur, &velocity) {
                markers.push(arrow);
            }
            markers.push(undistort::speed_label(track.id, cur, &velocity));
        }

        publisher.publish_cloud(&cloud);
        for marker in &markers {
            publisher.publish_marker(marker);
        }

        self.last_image = Some(image.clone());

        Ok(())
    }
}
