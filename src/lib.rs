//! Map points and ORB feature matching for visual SLAM.
//!
//! - [`atlas::map`]: MapPoint, KeyFrame and the Map registry.
//! - [`matching`]: the [`matching::OrbMatcher`] search routines.
//! - [`tracking::frame`]: features, camera model, scale pyramid and Frame.
//! - [`vocabulary`]: DBoW2-style vocabulary for bag-of-words grouping.
//! - [`geometry`]: SE3 / Sim3 transforms.
//! - [`config`]: YAML matcher settings.

pub mod atlas;
pub mod config;
pub mod geometry;
pub mod matching;
pub mod tracking;
pub mod vocabulary;

pub use atlas::map::{KeyFrame, Map, MapPoint};
pub use matching::OrbMatcher;
