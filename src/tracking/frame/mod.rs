//! Frame-level data: camera model, scale pyramid, features and the tracked Frame.

pub mod camera;
pub mod features;
pub mod frame;
pub mod pyramid;

pub use camera::CameraModel;
pub use features::{Features, ImageBounds, KeyPoint, GRID_COLS, GRID_ROWS};
pub use frame::Frame;
pub use pyramid::ScalePyramid;
