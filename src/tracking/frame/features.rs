//! Keypoints, descriptors and the spatial grid used to query them.
//!
//! Feature extraction happens upstream; this module only stores the
//! extractor output and answers the two questions the matcher keeps
//! asking: "which features lie near (u, v)?" and "which features share a
//! vocabulary node?".

use nalgebra::Point2;

use crate::matching::Descriptor;
use crate::vocabulary::{FeatureVector, OrbVocabulary};

/// Number of grid columns over the image.
pub const GRID_COLS: usize = 64;
/// Number of grid rows over the image.
pub const GRID_ROWS: usize = 48;

/// A detected ORB keypoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    /// Pixel coordinates.
    pub pt: Point2<f64>,
    /// Dominant orientation in degrees, `[0, 360)`.
    pub angle: f64,
    /// Pyramid level the keypoint was detected at.
    pub octave: usize,
}

impl KeyPoint {
    pub fn new(x: f64, y: f64, angle: f64, octave: usize) -> Self {
        Self {
            pt: Point2::new(x, y),
            angle,
            octave,
        }
    }
}

/// Region of the (undistorted) image where projections are valid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl ImageBounds {
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    /// Bounds of a `width × height` image with origin at the top-left pixel.
    pub fn from_size(width: f64, height: f64) -> Self {
        Self::new(0.0, width, 0.0, height)
    }

    /// Lower bounds inclusive, upper bounds exclusive.
    pub fn contains(&self, u: f64, v: f64) -> bool {
        u >= self.min_x && u < self.max_x && v >= self.min_y && v < self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Feature arrays of one image, indexed by feature number.
#[derive(Debug, Clone)]
pub struct Features {
    /// Keypoints as detected (distorted).
    pub keys: Vec<KeyPoint>,
    /// Undistorted keypoints; all geometry uses these.
    pub keys_un: Vec<KeyPoint>,
    /// Right-image coordinate per feature, negative when there is none.
    pub right_coords: Vec<f64>,
    pub descriptors: Vec<Descriptor>,
    /// Vocabulary node → feature indices, sorted by node id.
    pub feature_vector: FeatureVector,
    pub bounds: ImageBounds,

    // ─────────────────────────────────────────────────────────────────────────
    // Spatial index
    // ─────────────────────────────────────────────────────────────────────────
    grid: Vec<Vec<usize>>,
    grid_inv_width: f64,
    grid_inv_height: f64,
}

impl Features {
    /// Build the feature arrays and their spatial grid.
    ///
    /// All per-feature vectors must have the same length.
    pub fn new(
        keys: Vec<KeyPoint>,
        keys_un: Vec<KeyPoint>,
        right_coords: Vec<f64>,
        descriptors: Vec<Descriptor>,
        bounds: ImageBounds,
    ) -> Self {
        assert_eq!(keys.len(), keys_un.len(), "keys / keys_un length mismatch");
        assert_eq!(keys.len(), right_coords.len(), "keys / right_coords length mismatch");
        assert_eq!(keys.len(), descriptors.len(), "keys / descriptors length mismatch");

        let mut features = Self {
            keys,
            keys_un,
            right_coords,
            descriptors,
            feature_vector: FeatureVector::new(),
            bounds,
            grid: vec![Vec::new(); GRID_COLS * GRID_ROWS],
            grid_inv_width: GRID_COLS as f64 / bounds.width(),
            grid_inv_height: GRID_ROWS as f64 / bounds.height(),
        };
        features.assign_to_grid();
        features
    }

    /// Monocular features: no distortion, no right coordinates.
    pub fn monocular(keys: Vec<KeyPoint>, descriptors: Vec<Descriptor>, bounds: ImageBounds) -> Self {
        let n = keys.len();
        Self::new(keys.clone(), keys, vec![-1.0; n], descriptors, bounds)
    }

    /// Attach a precomputed vocabulary grouping.
    pub fn with_feature_vector(mut self, feature_vector: FeatureVector) -> Self {
        self.feature_vector = feature_vector;
        self
    }

    /// Group the descriptors by vocabulary node `levels_up` above the leaves.
    pub fn compute_feature_vector(&mut self, vocabulary: &OrbVocabulary, levels_up: usize) {
        let (_, feature_vector) = vocabulary.transform(&self.descriptors, levels_up);
        self.feature_vector = feature_vector;
    }

    pub fn len(&self) -> usize {
        self.keys_un.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys_un.is_empty()
    }

    /// Whether feature `idx` has a right-image (stereo or depth) measurement.
    pub fn is_stereo(&self, idx: usize) -> bool {
        self.right_coords[idx] >= 0.0
    }

    fn grid_cell(&self, kp: &KeyPoint) -> Option<(usize, usize)> {
        let cx = ((kp.pt.x - self.bounds.min_x) * self.grid_inv_width).floor();
        let cy = ((kp.pt.y - self.bounds.min_y) * self.grid_inv_height).floor();
        if cx < 0.0 || cy < 0.0 || cx >= GRID_COLS as f64 || cy >= GRID_ROWS as f64 {
            return None;
        }
        Some((cx as usize, cy as usize))
    }

    fn assign_to_grid(&mut self) {
        for idx in 0..self.keys_un.len() {
            if let Some((cx, cy)) = self.grid_cell(&self.keys_un[idx]) {
                self.grid[cx * GRID_ROWS + cy].push(idx);
            }
        }
    }

    /// Features whose undistorted position lies in the open square of
    /// half-side `r` around `(x, y)`, optionally restricted to octaves
    /// `[min_level, max_level]`.
    pub fn features_in_area(
        &self,
        x: f64,
        y: f64,
        r: f64,
        min_level: Option<usize>,
        max_level: Option<usize>,
    ) -> Vec<usize> {
        let mut indices = Vec::new();

        let min_cell_x = ((x - self.bounds.min_x - r) * self.grid_inv_width).floor().max(0.0);
        if min_cell_x >= GRID_COLS as f64 {
            return indices;
        }
        let max_cell_x =
            ((x - self.bounds.min_x + r) * self.grid_inv_width).ceil().min((GRID_COLS - 1) as f64);
        if max_cell_x < 0.0 {
            return indices;
        }
        let min_cell_y = ((y - self.bounds.min_y - r) * self.grid_inv_height).floor().max(0.0);
        if min_cell_y >= GRID_ROWS as f64 {
            return indices;
        }
        let max_cell_y =
            ((y - self.bounds.min_y + r) * self.grid_inv_height).ceil().min((GRID_ROWS - 1) as f64);
        if max_cell_y < 0.0 {
            return indices;
        }

        for cx in min_cell_x as usize..=max_cell_x as usize {
            for cy in min_cell_y as usize..=max_cell_y as usize {
                for &idx in &self.grid[cx * GRID_ROWS + cy] {
                    let kp = &self.keys_un[idx];
                    if min_level.is_some_and(|min| kp.octave < min) {
                        continue;
                    }
                    if max_level.is_some_and(|max| kp.octave > max) {
                        continue;
                    }
                    if (kp.pt.x - x).abs() < r && (kp.pt.y - y).abs() < r {
                        indices.push(idx);
                    }
                }
            }
        }

        indices
    }
}
