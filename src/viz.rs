use nalgebra as na;

/// One point of the debug cloud, colored with its track's tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColoredPoint {
    pub position: na::Point3<f64>,
    pub color: [u8; 3],
}

/// Accumulated per-frame debug cloud.
#[derive(Debug, Clone, Default)]
pub struct ColoredCloud {
    pub points: Vec<ColoredPoint>,
}

/// Frame annotations emitted alongside the cloud.
#[derive(Debug, Clone, PartialEq)]
pub enum Marker {
    /// Velocity arrow of one track, start and tip in sensor coordinates.
    Arrow {
        id: u64,
        color: [u8; 3],
        start: na::Point3<f64>,
        end: na::Point3<f64>,
    },
    /// Floating speed label of one track.
    Text {
        id: u64,
        position: na::Point3<f64>,
        text: String,
    },
    /// Drops every marker of the previous frame.
    Clear,
}

/// Output sink for the per-frame debug artifacts. The tracker stays agnostic
/// of the transport behind it.
pub trait Publisher {
    fn publish_cloud(&mut self, cloud: &ColoredCloud);
    fn publish_marker(&mut self, marker: &Marker);
}

/// Publisher that drops everything, for headless runs.
#[derive(Debug, Default)]
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish_cloud(&mut self, _cloud: &ColoredCloud) {}
    fn publish_marker(&mut self, _marker: &Marker) {}
}
