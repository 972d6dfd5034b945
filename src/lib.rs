pub mod assignment;
pub mod config;
pub mod detection;
pub mod error;
pub mod flow;
pub mod fusion;
pub mod geometry;
mod kalman;
pub mod motion;
pub mod track;
pub mod tracker;
pub mod undistort;
pub mod viz;

pub use crate::config::Config;
pub use crate::detection::{CloudPoint, Detection, Rect2d};
pub use crate::error::Error;
pub use crate::track::Track;
pub use crate::tracker::FusionTracker;
pub use crate::viz::{ColoredCloud, Marker, NullPublisher, Publisher};
