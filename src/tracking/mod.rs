//! Tracking-side data the matcher works on.
//!
//! Feature extraction, pose estimation and the keyframe decision live
//! upstream; this module only carries what they produce.

pub mod frame;

pub use frame::Frame;
