//! Map module - Core SLAM map data structures.
//!
//! This module contains:
//! - [`KeyFrame`] - Selected frames with poses and per-feature MapPoint slots
//! - [`MapPoint`] - 3D landmarks observed by KeyFrames
//! - [`Map`] - Registry of both, plus the map-wide creation and position locks
//!
//! # Architecture
//!
//! The map forms a bipartite graph:
//! - KeyFrames hold MapPoints (KF → MP via slot `i` of the feature array)
//! - MapPoints track their observers (MP → KF via weak observation handles)
//!
//! Both sides are updated by the caller; [`MapPoint::replace`] and
//! [`MapPoint::set_bad_flag`] keep them consistent when points merge or die.

pub mod keyframe;
pub mod map;
pub mod map_point;
pub mod types;

pub use keyframe::KeyFrame;
pub use map::{Map, PositionFreeze};
pub use map_point::{distinctive_descriptor_index, MapPoint, TrackProjection};
pub use types::{FrameId, KeyFrameId, MapPointId};
