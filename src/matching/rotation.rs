//! Rotation-consistency voting.
//!
//! A camera rotates as a whole, so the difference of keypoint orientations
//! over all true matches clusters around one value. Each match votes for
//! the bin of its angular residual; only matches in the three most voted
//! bins survive.

use super::HISTO_LENGTH;

/// Histogram bin of the angular residual `angle1 - angle2` (degrees).
pub fn rotation_bin(angle1: f64, angle2: f64) -> usize {
    let mut rot = angle1 - angle2;
    if rot < 0.0 {
        rot += 360.0;
    }
    let bin = (rot * HISTO_LENGTH as f64 / 360.0).round() as usize;
    if bin >= HISTO_LENGTH {
        0
    } else {
        bin
    }
}

/// The three most populated bins, most populated first.
///
/// The second and third are dropped when they hold less than a tenth of
/// the first; the third alone is dropped when only it falls short.
pub fn compute_three_maxima(histo: &[Vec<usize>]) -> [Option<usize>; 3] {
    let mut max = [0usize; 3];
    let mut ind: [Option<usize>; 3] = [None; 3];

    for (i, bin) in histo.iter().enumerate() {
        let s = bin.len();
        if s > max[0] {
            max = [s, max[0], max[1]];
            ind = [Some(i), ind[0], ind[1]];
        } else if s > max[1] {
            max = [max[0], s, max[1]];
            ind = [ind[0], Some(i), ind[1]];
        } else if s > max[2] {
            max[2] = s;
            ind[2] = Some(i);
        }
    }

    let tenth = 0.1 * max[0] as f64;
    if (max[1] as f64) < tenth {
        ind[1] = None;
        ind[2] = None;
    } else if (max[2] as f64) < tenth {
        ind[2] = None;
    }

    ind
}

/// Per-call vote collector.
///
/// Stores whatever index the caller needs to undo a match later.
#[derive(Debug, Clone)]
pub struct RotationHistogram {
    bins: Vec<Vec<usize>>,
}

impl RotationHistogram {
    pub fn new() -> Self {
        Self {
            bins: vec![Vec::new(); HISTO_LENGTH],
        }
    }

    /// Record match `idx` with keypoint angles `angle1` and `angle2`.
    pub fn add(&mut self, angle1: f64, angle2: f64, idx: usize) {
        self.bins[rotation_bin(angle1, angle2)].push(idx);
    }

    /// Indices whose bin is not among the dominant ones.
    pub fn outliers(&self) -> Vec<usize> {
        let [a, b, c] = compute_three_maxima(&self.bins);
        self.bins
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != a && Some(*i) != b && Some(*i) != c)
            .flat_map(|(_, bin)| bin.iter().copied())
            .collect()
    }

    pub fn bins(&self) -> &[Vec<usize>] {
        &self.bins
    }
}

impl Default for RotationHistogram {
    fn default() -> Self {
        Self::new()
    }
}
