use std::rc::Rc;

use nalgebra as na;
use opencv::core::{self, Mat, Scalar};

use fusion_tracker::{
    CloudPoint, ColoredCloud, Config, Detection, FusionTracker, Marker, Publisher, Rect2d,
};

/// Publisher that records everything for inspection.
#[derive(Default)]
struct Recorder {
    clouds: Vec<ColoredCloud>,
    markers: Vec<Marker>,
}

impl Publisher for Recorder {
    fn publish_cloud(&mut self, cloud: &ColoredCloud) {
        self.clouds.push(cloud.clone());
    }

    fn publish_marker(&mut self, marker: &Marker) {
        self.markers.push(marker.clone());
    }
}

fn black_image() -> Mat {
    Mat::new_rows_cols_with_default(360, 640, core::CV_8UC3, Scalar::all(0.0)).unwrap()
}

/// Stationary box with a cloud of ramped capture-time offsets.
fn make_box(center: na::Vector3<f64>, rect2d: Rect2d, confidence: f64) -> Rc<Detection> {
    let (cx, cy, cz) = (center.x, center.y, center.z);
    let footprint = [
        na::Point3::new(cx + 2.0, cy + 1.0, cz - 0.5),
        na::Point3::new(cx - 2.0, cy + 1.0, cz - 0.5),
        na::Point3::new(cx - 2.0, cy - 1.0, cz - 0.5),
        na::Point3::new(cx + 2.0, cy - 1.0, cz - 0.5),
        na::Point3::new(cx + 2.0, cy + 1.0, cz + 0.5),
        na::Point3::new(cx - 2.0, cy + 1.0, cz + 0.5),
        na::Point3::new(cx - 2.0, cy - 1.0, cz + 0.5),
        na::Point3::new(cx + 2.0, cy - 1.0, cz + 0.5),
    ];

    let mut points = Vec::new();
    for k in 0..40 {
        points.push(CloudPoint {
            x: cx,
            y: cy,
            z: cz,
            intensity: k as f64 / 40.0,
        });
    }

    Rc::new(Detection {
        points,
        footprint,
        rect2d,
        global_pose: na::Isometry3::identity(),
        confidence,
    })
}

#[test]
fn two_frames_of_stationary_objects() {
    let dets = vec![
        make_box(
            na::Vector3::new(10.0, 2.0, 0.5),
            Rect2d::new(0.0, 0.0, 300.0, 360.0),
            1.0,
        ),
        make_box(
            na::Vector3::new(20.0, -3.0, 0.5),
            Rect2d::new(320.0, 0.0, 300.0, 360.0),
            1.0,
        ),
    ];

    let mut tracker = FusionTracker::new(Config::default());
    let mut recorder = Recorder::default();
    let image = black_image();

    tracker.track(&dets, &image, &mut recorder).unwrap();
    assert_eq!(tracker.tracks().len(), 2);
    assert!(tracker.tracks().iter().all(|t| t.hits == 1));
    // bootstrap publishes nothing
    assert!(recorder.clouds.is_empty());
    assert!(recorder.markers.is_empty());

    tracker.track(&dets, &image, &mut recorder).unwrap();
    assert_eq!(tracker.tracks().len(), 2);

    let mut ids: Vec<u64> = tracker.tracks().iter().map(|t| t.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1]);

    for track in tracker.tracks() {
        assert_eq!(track.time_since_update, 0);
        assert_eq!(track.hits, 2);
        assert_eq!(track.hit_streak, 1);
        // no image motion, no cloud blur: the estimate stays near zero
        assert!(track.velocity().norm() < 0.5, "{}", track.velocity());
        assert!(track.estimated_velocity.norm() < 0.5);
    }

    // the clear marker precedes the frame's own annotations
    assert_eq!(recorder.markers.first(), Some(&Marker::Clear));
    let labels = recorder
        .markers
        .iter()
        .filter(|m| matches!(m, Marker::Text { .. }))
        .count();
    assert_eq!(labels, 2);

    // both undistorted clouds land in one publication
    assert_eq!(recorder.clouds.len(), 1);
    assert_eq!(recorder.clouds[0].points.len(), 80);
}

#[test]
fn expired_detection_prunes_its_track() {
    let rect = Rect2d::new(0.0, 0.0, 640.0, 360.0);
    let center = na::Vector3::new(10.0, 2.0, 0.5);

    let mut tracker = FusionTracker::new(Config::default());
    let mut recorder = Recorder::default();
    let image = black_image();

    tracker
        .track(&[make_box(center, rect, 1.0)], &image, &mut recorder)
        .unwrap();
    assert_eq!(tracker.tracks().len(), 1);

    // the same object re-detected as expired still associates and updates
    tracker
        .track(&[make_box(center, rect, 0.0)], &image, &mut recorder)
        .unwrap();
    assert_eq!(tracker.tracks().len(), 1);

    // next frame drops it before association
    tracker.track(&[], &image, &mut recorder).unwrap();
    assert!(tracker.tracks().is_empty());
    assert_eq!(tracker.total_frames(), 3);
}

#[test]
fn unmatched_detection_spawns_a_track() {
    let near = make_box(
        na::Vector3::new(10.0, 2.0, 0.5),
        Rect2d::new(0.0, 0.0, 300.0, 360.0),
        1.0,
    );
    let far = make_box(
        na::Vector3::new(40.0, -10.0, 0.5),
        Rect2d::new(320.0, 0.0, 300.0, 360.0),
        1.0,
    );

    let mut tracker = FusionTracker::new(Config::default());
    let mut recorder = Recorder::default();
    let image = black_image();

    tracker
        .track(std::slice::from_ref(&near), &image, &mut recorder)
        .unwrap();
    assert_eq!(tracker.tracks().len(), 1);

    tracker
        .track(&[near.clone(), far.clone()], &image, &mut recorder)
        .unwrap();
    assert_eq!(tracker.tracks().len(), 2);

    let fresh = tracker.tracks().iter().find(|t| t.id == 1).unwrap();
    assert_eq!(fresh.hits, 1);
    let seasoned = tracker.tracks().iter().find(|t| t.id == 0).unwrap();
    assert_eq!(seasoned.hits, 2);
}
