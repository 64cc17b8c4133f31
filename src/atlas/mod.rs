//! Atlas module - Map data structures shared by the SLAM threads.
//!
//! - [`map::KeyFrame`] - KeyFrames with MapPoint slots
//! - [`map::MapPoint`] - 3D landmarks with observation tracking
//! - [`map::Map`] - Container with id allocation and position freezing

pub mod map;

// Re-export commonly used types
pub use map::{FrameId, KeyFrame, KeyFrameId, Map, MapPoint, MapPointId};
