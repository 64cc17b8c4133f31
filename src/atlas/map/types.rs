//! Core ID types for the map structures.

/// Unique identifier for a KeyFrame.
///
/// KeyFrameIds are assigned by the caller when KeyFrames are created and
/// order observations inside a MapPoint: the lowest surviving id is the
/// fallback reference when the current reference KeyFrame is erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyFrameId(pub u64);

impl KeyFrameId {
    /// Create a new KeyFrameId with the given value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for KeyFrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KF{}", self.0)
    }
}

/// Unique identifier for a MapPoint within a Map.
///
/// MapPointIds are assigned sequentially by the owning [`Map`](super::Map)
/// under its creation lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapPointId(pub u64);

impl MapPointId {
    /// Create a new MapPointId with the given value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for MapPointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MP{}", self.0)
    }
}

/// Identifier of the (non-key) frame a structure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub u64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "F{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyframe_id_ordering() {
        let id1 = KeyFrameId::new(42);
        let id2 = KeyFrameId::new(42);
        let id3 = KeyFrameId::new(43);

        assert_eq!(id1, id2);
        assert!(id1 < id3);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(format!("{}", MapPointId::new(123)), "MP123");
        assert_eq!(format!("{}", KeyFrameId::new(7)), "KF7");
        assert_eq!(format!("{}", FrameId(3)), "F3");
    }

    #[test]
    fn test_id_as_btree_key() {
        use std::collections::BTreeMap;

        let mut map: BTreeMap<KeyFrameId, &str> = BTreeMap::new();
        map.insert(KeyFrameId::new(5), "later");
        map.insert(KeyFrameId::new(1), "first");

        assert_eq!(map.keys().next(), Some(&KeyFrameId::new(1)));
        assert_eq!(map.get(&KeyFrameId::new(3)), None);
    }
}
