//! Map - Container for KeyFrames and MapPoints.
//!
//! The Map owns the MapPoints registered into it and hands out the two
//! map-wide synchronisation points MapPoints rely on:
//!
//! - the **creation lock**, a counter serialising MapPoint id allocation;
//! - the **position lock**, taken shared by every single-point position
//!   write and exclusively by [`Map::freeze_positions`], so a bulk
//!   correction (loop closure) sees and writes a consistent snapshot.
//!
//! Both are scoped to the Map instance, so independent maps (and tests)
//! never contend with each other.

use std::collections::BTreeMap;
use std::sync::Arc;

use nalgebra::Vector3;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use super::keyframe::KeyFrame;
use super::map_point::MapPoint;
use super::types::{KeyFrameId, MapPointId};

/// The SLAM map containing KeyFrames and MapPoints.
pub struct Map {
    /// All MapPoints in the map.
    map_points: RwLock<BTreeMap<MapPointId, Arc<MapPoint>>>,

    /// All KeyFrames in the map.
    keyframes: RwLock<BTreeMap<KeyFrameId, Arc<KeyFrame>>>,

    /// Next MapPoint id; the mutex is the creation lock.
    next_mp_id: Mutex<u64>,

    position_lock: RwLock<()>,
}

/// Exclusive hold on every MapPoint position of one Map.
///
/// While alive, [`MapPoint::set_world_pos`] blocks for points of this Map;
/// positions are rewritten through [`PositionFreeze::set_world_pos`].
pub struct PositionFreeze<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

impl PositionFreeze<'_> {
    pub fn set_world_pos(&self, map_point: &MapPoint, pos: Vector3<f64>) {
        map_point.write_world_pos(pos);
    }
}

impl Map {
    /// Create a new empty Map.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            map_points: RwLock::new(BTreeMap::new()),
            keyframes: RwLock::new(BTreeMap::new()),
            next_mp_id: Mutex::new(0),
            position_lock: RwLock::new(()),
        })
    }

    pub(crate) fn allocate_map_point_id(&self) -> MapPointId {
        let mut next = self.next_mp_id.lock();
        let id = MapPointId::new(*next);
        *next += 1;
        id
    }

    pub(crate) fn position_update_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.position_lock.read()
    }

    /// Stop all individual position writes until the returned guard drops.
    pub fn freeze_positions(&self) -> PositionFreeze<'_> {
        PositionFreeze {
            _guard: self.position_lock.write(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // MapPoints
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_map_point(&self, map_point: Arc<MapPoint>) {
        self.map_points.write().insert(map_point.id, map_point);
    }

    /// Remove a MapPoint from the registry.
    ///
    /// The point itself stays alive for as long as other handles exist.
    pub fn erase_map_point(&self, id: MapPointId) -> Option<Arc<MapPoint>> {
        let removed = self.map_points.write().remove(&id);
        if removed.is_some() {
            debug!("[Map] erased {}", id);
        }
        removed
    }

    pub fn map_point(&self, id: MapPointId) -> Option<Arc<MapPoint>> {
        self.map_points.read().get(&id).cloned()
    }

    /// All registered MapPoints, ordered by id.
    pub fn map_points_in_map(&self) -> Vec<Arc<MapPoint>> {
        self.map_points.read().values().cloned().collect()
    }

    pub fn num_map_points(&self) -> usize {
        self.map_points.read().len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // KeyFrames
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_keyframe(&self, keyframe: Arc<KeyFrame>) {
        self.keyframes.write().insert(keyframe.id, keyframe);
    }

    pub fn erase_keyframe(&self, id: KeyFrameId) -> Option<Arc<KeyFrame>> {
        self.keyframes.write().remove(&id)
    }

    pub fn keyframe(&self, id: KeyFrameId) -> Option<Arc<KeyFrame>> {
        self.keyframes.read().get(&id).cloned()
    }

    /// All registered KeyFrames, ordered by id.
    pub fn keyframes_in_map(&self) -> Vec<Arc<KeyFrame>> {
        self.keyframes.read().values().cloned().collect()
    }

    pub fn num_keyframes(&self) -> usize {
        self.keyframes.read().len()
    }
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("keyframes", &self.num_keyframes())
            .field("map_points", &self.num_map_points())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::map::types::FrameId;
    use crate::geometry::SE3;
    use crate::tracking::frame::{CameraModel, Features, ImageBounds, KeyPoint, ScalePyramid};

    fn make_keyframe(id: u64) -> Arc<KeyFrame> {
        let features = Features::monocular(
            vec![KeyPoint::new(10.0, 10.0, 0.0, 0)],
            vec![[0u8; 32]],
            ImageBounds::from_size(640.0, 480.0),
        );
        Arc::new(KeyFrame::new(
            KeyFrameId::new(id),
            FrameId(id),
            features,
            CameraModel::monocular(500.0, 500.0, 320.0, 240.0),
            ScalePyramid::default(),
            SE3::identity(),
        ))
    }

    #[test]
    fn test_register_and_erase_map_points() {
        let map = Map::new();
        let kf = make_keyframe(0);
        let a = MapPoint::new(Vector3::new(1.0, 0.0, 0.0), &kf, &map);
        let b = MapPoint::new(Vector3::new(2.0, 0.0, 0.0), &kf, &map);
        map.add_map_point(Arc::clone(&a));
        map.add_map_point(Arc::clone(&b));

        assert_eq!(map.num_map_points(), 2);
        let ids: Vec<_> = map.map_points_in_map().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);

        assert!(map.erase_map_point(a.id).is_some());
        assert!(map.erase_map_point(a.id).is_none());
        assert!(map.map_point(a.id).is_none());
        // Erasing from the registry does not invalidate existing handles
        assert_eq!(a.world_pos(), Vector3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_register_keyframes() {
        let map = Map::new();
        map.add_keyframe(make_keyframe(3));
        map.add_keyframe(make_keyframe(1));

        let ids: Vec<_> = map.keyframes_in_map().iter().map(|kf| kf.id).collect();
        assert_eq!(ids, vec![KeyFrameId::new(1), KeyFrameId::new(3)]);
        assert!(map.keyframe(KeyFrameId::new(3)).is_some());
        assert!(map.erase_keyframe(KeyFrameId::new(3)).is_some());
        assert_eq!(map.num_keyframes(), 1);
    }

    #[test]
    fn test_concurrent_id_allocation_is_unique() {
        let map = Map::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || {
                    (0..250).map(|_| map.allocate_map_point_id()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<MapPointId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1000);
        assert_eq!(ids.last(), Some(&MapPointId::new(999)));
    }

    #[test]
    fn test_freeze_positions_rewrites_points() {
        let map = Map::new();
        let kf = make_keyframe(0);
        let mp = MapPoint::new(Vector3::zeros(), &kf, &map);

        {
            let freeze = map.freeze_positions();
            freeze.set_world_pos(&mp, Vector3::new(0.0, 1.0, 0.0));
        }
        mp.set_world_pos(Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(mp.world_pos(), Vector3::new(0.0, 0.0, 1.0));
    }
}
