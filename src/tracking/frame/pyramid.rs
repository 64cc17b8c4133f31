//! Per-level scale factors of the ORB image pyramid.

use crate::config::PyramidSettings;

/// Scale pyramid of an ORB extractor.
///
/// Level `i` is the image downscaled by `scale_factor^i`; a feature detected
/// there has a position uncertainty proportional to that factor, so its
/// squared sigma is `scale_factor^(2i)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalePyramid {
    pub n_levels: usize,
    pub scale_factor: f64,
    pub log_scale_factor: f64,
    pub scale_factors: Vec<f64>,
    pub inv_scale_factors: Vec<f64>,
    pub level_sigma2: Vec<f64>,
    pub inv_level_sigma2: Vec<f64>,
}

impl ScalePyramid {
    pub fn new(n_levels: usize, scale_factor: f64) -> Self {
        assert!(n_levels >= 1, "pyramid needs at least one level");
        assert!(scale_factor > 1.0, "pyramid scale factor must exceed 1");

        let mut scale_factors = Vec::with_capacity(n_levels);
        let mut level_sigma2 = Vec::with_capacity(n_levels);
        let mut factor = 1.0;
        for _ in 0..n_levels {
            scale_factors.push(factor);
            level_sigma2.push(factor * factor);
            factor *= scale_factor;
        }

        let inv_scale_factors = scale_factors.iter().map(|s| 1.0 / s).collect();
        let inv_level_sigma2 = level_sigma2.iter().map(|s| 1.0 / s).collect();

        Self {
            n_levels,
            scale_factor,
            log_scale_factor: scale_factor.ln(),
            scale_factors,
            inv_scale_factors,
            level_sigma2,
            inv_level_sigma2,
        }
    }

    pub fn from_settings(settings: &PyramidSettings) -> Self {
        Self::new(settings.n_levels, settings.scale_factor)
    }

    /// Scale factor of the coarsest level.
    pub fn max_scale_factor(&self) -> f64 {
        self.scale_factors[self.n_levels - 1]
    }
}

impl Default for ScalePyramid {
    fn default() -> Self {
        Self::new(8, 1.2)
    }
}
