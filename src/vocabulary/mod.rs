//! ORB Vocabulary for Bag-of-Words accelerated matching.
//!
//! This module loads a DBoW2-format vocabulary tree and quantizes ORB
//! descriptors against it. The matcher only needs the [`FeatureVector`]:
//! features that fall under the same vocabulary node are the only
//! candidates compared against each other.
//!
//! # Vocabulary Structure
//!
//! The vocabulary is a hierarchical k-means tree trained on ORB descriptors:
//! - Branching factor k (typically 10)
//! - Depth L levels (typically 5-6)
//! - ~100,000 leaf nodes ("visual words")
//!
//! # Key Types
//!
//! - [`BowVector`]: Histogram of word occurrences with TF-IDF weights
//! - [`FeatureVector`]: Groups feature indices by vocabulary node, ordered by node id
//! - [`OrbVocabulary`]: The vocabulary tree structure with quantization methods

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

use crate::matching::{descriptor_distance, Descriptor};

/// Bag-of-Words vector: word_id -> L1-normalized TF-IDF weight.
pub type BowVector = BTreeMap<u32, f64>;

/// Feature vector: node_id -> feature indices (ascending).
///
/// Iteration follows ascending node id, which the BoW matchers rely on to
/// walk two vectors in lockstep.
pub type FeatureVector = BTreeMap<u32, Vec<usize>>;

/// Errors that can occur when loading a vocabulary.
#[derive(Error, Debug)]
pub enum VocabularyError {
    #[error("vocabulary I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vocabulary parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

impl VocabularyError {
    fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}

/// A node in the vocabulary tree.
#[derive(Debug, Clone)]
pub struct VocabNode {
    /// Node ID (0 is root, children numbered sequentially)
    pub id: u32,
    /// Parent node ID (`None` for the root)
    pub parent: Option<u32>,
    /// Child node IDs (empty for leaf nodes)
    pub children: Vec<u32>,
    /// Cluster center descriptor
    pub descriptor: Descriptor,
    /// IDF weight (non-zero for leaf nodes)
    pub weight: f64,
    /// Word ID if this is a leaf node
    pub word_id: Option<u32>,
}

impl VocabNode {
    fn new(id: u32, parent: Option<u32>) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            descriptor: [0u8; 32],
            weight: 0.0,
            word_id: None,
        }
    }

    /// Check if this node is a leaf (visual word).
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// ORB Vocabulary tree (DBoW2 text format).
#[derive(Debug)]
pub struct OrbVocabulary {
    /// All nodes in the tree (nodes[0] is root)
    nodes: Vec<VocabNode>,
    /// Word ID to node ID mapping (for leaf nodes)
    words: Vec<u32>,
    /// Branching factor
    k: usize,
    /// Depth levels
    l: usize,
}

impl OrbVocabulary {
    /// Load vocabulary from a DBoW2 text file.
    ///
    /// ```ignore
    /// let vocab = OrbVocabulary::load_from_text("data/ORBvoc.txt")?;
    /// ```
    pub fn load_from_text<P: AsRef<Path>>(path: P) -> Result<Self, VocabularyError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }

    /// Parse a vocabulary in DBoW2 text format.
    ///
    /// # Format
    ///
    /// ```text
    /// k L scoring weighting
    /// parent_id is_leaf desc[0] desc[1] ... desc[31] weight
    /// ...
    /// ```
    ///
    /// One line per node, root excluded; node ids follow line order
    /// starting at 1. Lines with fewer than 35 fields are skipped.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, VocabularyError> {
        let mut lines = reader.lines();

        let header = lines
            .next()
            .ok_or_else(|| VocabularyError::parse(1, "empty vocabulary"))??;
        let header_parts: Vec<&str> = header.split_whitespace().collect();
        if header_parts.len() < 2 {
            return Err(VocabularyError::parse(1, "expected `k L [scoring weighting]`"));
        }
        let k: usize = header_parts[0]
            .parse()
            .map_err(|_| VocabularyError::parse(1, "invalid k"))?;
        let l: usize = header_parts[1]
            .parse()
            .map_err(|_| VocabularyError::parse(1, "invalid L"))?;

        let mut nodes = vec![VocabNode::new(0, None)];
        let mut words = Vec::new();

        for (offset, line) in lines.enumerate() {
            let line_num = offset + 2;
            let line = line?;
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 35 {
                continue;
            }

            let parent_id: u32 = parts[0]
                .parse()
                .map_err(|_| VocabularyError::parse(line_num, "invalid parent id"))?;
            if parent_id as usize >= nodes.len() {
                return Err(VocabularyError::parse(
                    line_num,
                    format!("parent {} defined after its child", parent_id),
                ));
            }
            let is_leaf = parts[1] == "1";

            let mut descriptor = [0u8; 32];
            for (byte, field) in descriptor.iter_mut().zip(&parts[2..34]) {
                *byte = field
                    .parse()
                    .map_err(|_| VocabularyError::parse(line_num, "invalid descriptor byte"))?;
            }
            let weight: f64 = parts[34]
                .parse()
                .map_err(|_| VocabularyError::parse(line_num, "invalid weight"))?;

            let node_id = nodes.len() as u32;
            let mut node = VocabNode::new(node_id, Some(parent_id));
            node.descriptor = descriptor;
            node.weight = weight;
            if is_leaf {
                node.word_id = Some(words.len() as u32);
                words.push(node_id);
            }

            nodes[parent_id as usize].children.push(node_id);
            nodes.push(node);
        }

        tracing::info!(
            "[Vocabulary] loaded k={}, L={}, {} nodes, {} words",
            k,
            l,
            nodes.len(),
            words.len()
        );

        Ok(Self { nodes, words, k, l })
    }

    /// Get vocabulary parameters (k, L).
    pub fn params(&self) -> (usize, usize) {
        (self.k, self.l)
    }

    /// Get number of visual words (leaf nodes).
    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    /// Get number of nodes in the tree, root included.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Descend to the closest leaf. Returns (word_id, leaf_node_id).
    fn transform_descriptor(&self, desc: &Descriptor) -> (u32, u32) {
        let mut node_id = 0usize;

        while let Some((&first, rest)) = self.nodes[node_id].children.split_first() {
            let mut best_child = first;
            let mut best_dist = descriptor_distance(desc, &self.nodes[first as usize].descriptor);
            for &child in rest {
                let dist = descriptor_distance(desc, &self.nodes[child as usize].descriptor);
                if dist < best_dist {
                    best_dist = dist;
                    best_child = child;
                }
            }
            node_id = best_child as usize;
        }

        let word_id = self.nodes[node_id].word_id.unwrap_or(0);
        (word_id, node_id as u32)
    }

    /// Ancestor `levels_up` levels above `leaf_id`, stopping at the root.
    fn ancestor(&self, leaf_id: u32, levels_up: usize) -> u32 {
        let mut node_id = leaf_id;
        for _ in 0..levels_up {
            match self.nodes[node_id as usize].parent {
                Some(parent) => node_id = parent,
                None => break,
            }
        }
        node_id
    }

    /// Quantize descriptors into a BowVector and a FeatureVector.
    ///
    /// # Arguments
    ///
    /// * `descriptors` - One descriptor per feature
    /// * `levels_up` - Levels above the leaves used to group features
    pub fn transform(&self, descriptors: &[Descriptor], levels_up: usize) -> (BowVector, FeatureVector) {
        let mut bow = BowVector::new();
        let mut feat = FeatureVector::new();

        for (i, desc) in descriptors.iter().enumerate() {
            let (word_id, leaf_id) = self.transform_descriptor(desc);

            *bow.entry(word_id).or_insert(0.0) += self.nodes[leaf_id as usize].weight;

            let node = self.ancestor(leaf_id, levels_up);
            feat.entry(node).or_default().push(i);
        }

        let sum: f64 = bow.values().sum();
        if sum > 0.0 {
            for v in bow.values_mut() {
                *v /= sum;
            }
        }

        (bow, feat)
    }
}
