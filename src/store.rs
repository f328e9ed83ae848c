//! Thread-safe cover point store
//!
//! One reader-writer lock guards the octree and both lookup maps together,
//! so a reader never observes a half-applied batch. Every public operation
//! checks the lifecycle first and turns into a no-op once the store is shut
//! down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use glam::Vec3;
use log::{debug, trace, warn};

use crate::config::CoverConfig;
use crate::cover_point::{CoverPoint, CoverPointDto, ObjectId};
use crate::geometry::{Aabb, QueryRegion};
use crate::octree::{CoverIndex, CoverPointHandle};

/// Lifecycle state of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Accepting operations
    Running,
    /// Torn down; every operation is a no-op
    ShutDown,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Lifecycle::Running,
            _ => Lifecycle::ShutDown,
        }
    }
}

/// Exact-location key; `-0.0` and `0.0` map to the same key
type LocationKey = [u32; 3];

fn location_key(location: Vec3) -> LocationKey {
    // adding zero turns -0.0 into 0.0
    let location = location + Vec3::ZERO;
    [location.x.to_bits(), location.y.to_bits(), location.z.to_bits()]
}

#[derive(Debug)]
struct StoreState {
    index: CoverIndex,
    by_location: HashMap<LocationKey, CoverPointHandle>,
    by_owner: HashMap<ObjectId, Vec<Vec3>>,
}

impl StoreState {
    fn new(bounds: Aabb) -> Self {
        Self {
            index: CoverIndex::new(bounds),
            by_location: HashMap::new(),
            by_owner: HashMap::new(),
        }
    }

    fn forget_owner_location(&mut self, owner: ObjectId, location: Vec3) {
        let key = location_key(location);
        if let Some(locations) = self.by_owner.get_mut(&owner) {
            if let Some(position) = locations.iter().position(|l| location_key(*l) == key) {
                locations.swap_remove(position);
            }
            if locations.is_empty() {
                self.by_owner.remove(&owner);
            }
        }
    }
}

/// Concurrent facade over the cover point octree
///
/// # Example
///
/// ```
/// use cover_points::*;
/// use glam::Vec3;
/// use std::sync::Arc;
///
/// let store = CoverStore::new(Aabb::from_center_extent(Vec3::ZERO, Vec3::splat(1000.0)), 50.0);
/// let wall = Arc::new(WorldObject::new(1, "wall", CollisionClass::Static));
///
/// let accepted = store.add_points(vec![
///     CoverPointDto::new(&wall, Vec3::ZERO, false),
///     CoverPointDto::new(&wall, Vec3::new(10.0, 0.0, 0.0), false),
/// ]);
/// assert_eq!(accepted, 1);
///
/// assert!(store.hold(Vec3::ZERO));
/// assert!(!store.hold(Vec3::ZERO));
/// assert!(store.release(Vec3::ZERO));
/// ```
#[derive(Debug)]
pub struct CoverStore {
    state: RwLock<StoreState>,
    lifecycle: AtomicU8,
    bounds: Aabb,
    dedup_radius: f32,
}

impl CoverStore {
    /// Create an empty store over `bounds`
    pub fn new(bounds: Aabb, dedup_radius: f32) -> Self {
        Self {
            state: RwLock::new(StoreState::new(bounds)),
            lifecycle: AtomicU8::new(Lifecycle::Running as u8),
            bounds,
            dedup_radius: dedup_radius.max(0.0),
        }
    }

    /// Create an empty store using the configured world bounds and dedup radius
    pub fn from_config(config: &CoverConfig) -> Self {
        Self::new(config.world_bounds, config.dedup_radius())
    }

    /// Minimum distance between resident points
    #[inline]
    pub fn dedup_radius(&self) -> f32 {
        self.dedup_radius
    }

    /// Current lifecycle state
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    /// Check whether the store was shut down
    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.lifecycle() == Lifecycle::ShutDown
    }

    /// Shut the store down; returns `false` if it already was
    ///
    /// Work already past its lifecycle check runs to completion, but its
    /// results are discarded on merge. A write already holding the lock
    /// finishes before this returns; no write is applied afterwards.
    pub fn shutdown(&self) -> bool {
        let first = self.lifecycle.swap(Lifecycle::ShutDown as u8, Ordering::AcqRel) == Lifecycle::Running as u8;
        // wait out a write that took the lock before the flag flipped
        drop(self.write());
        first
    }

    /// Number of resident points
    pub fn len(&self) -> usize {
        self.read().index.len()
    }

    /// Check if the store holds no points
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All resident points inside a region
    pub fn find_points(&self, region: &QueryRegion) -> Vec<CoverPoint> {
        if self.is_shut_down() {
            return Vec::new();
        }
        self.read().index.query(region)
    }

    /// Locations of every resident point generated by `owner`
    pub fn owner_locations(&self, owner: ObjectId) -> Vec<Vec3> {
        if self.is_shut_down() {
            return Vec::new();
        }
        self.read().by_owner.get(&owner).cloned().unwrap_or_default()
    }

    /// Merge a generator batch
    ///
    /// Every candidate is dedup-checked against the current contents,
    /// including points accepted earlier in the same batch.
    ///
    /// # Returns
    ///
    /// Number of accepted points
    pub fn add_points(&self, batch: Vec<CoverPointDto>) -> usize {
        if self.is_shut_down() {
            debug!("store shut down, discarding batch of {} cover points", batch.len());
            return 0;
        }

        let total = batch.len();
        let Some(mut state) = self.write_running() else {
            debug!("store shut down while waiting, discarding batch of {total} cover points");
            return 0;
        };
        let mut accepted = 0;
        for dto in batch {
            let key = location_key(dto.location);
            if state.by_location.contains_key(&key) {
                trace!("cover point at {} already resident", dto.location);
                continue;
            }
            let owner = dto.owner.id();
            let location = dto.location;
            match state.index.insert(CoverPoint::from(dto), self.dedup_radius) {
                Some(handle) => {
                    state.by_location.insert(key, handle);
                    state.by_owner.entry(owner).or_default().push(location);
                    accepted += 1;
                }
                None => trace!("cover point at {} rejected as duplicate", location),
            }
        }
        state.index.compact();
        debug!("merged {accepted} of {total} cover points");
        accepted
    }

    /// Evict stale points from an area
    ///
    /// The area is first enlarged by half of its size on each axis. Every
    /// resident point in the enlarged area for which `is_stale` returns
    /// `true` is removed.
    ///
    /// # Returns
    ///
    /// Number of evicted points
    pub fn remove_stale_points<F>(&self, area: &Aabb, is_stale: F) -> usize
    where
        F: Fn(&CoverPoint) -> bool,
    {
        if self.is_shut_down() {
            return 0;
        }

        let area = area.enlarged_by_half();
        let Some(mut state) = self.write_running() else {
            return 0;
        };
        let mut evicted = 0;
        for handle in state.index.handles_in(&area) {
            let stale = match state.index.get(handle) {
                Some(point) => is_stale(point),
                None => continue,
            };
            if !stale {
                continue;
            }
            if let Some(point) = state.index.remove(handle) {
                state.by_location.remove(&location_key(point.location));
                state.forget_owner_location(point.owner.id(), point.location);
                trace!("evicted stale cover point at {}", point.location);
                evicted += 1;
            }
        }
        state.index.compact();
        if evicted > 0 {
            debug!("evicted {evicted} stale cover points");
        }
        evicted
    }

    /// Evict every point generated by `owner`
    ///
    /// # Returns
    ///
    /// Number of evicted points
    pub fn remove_points_of_owner(&self, owner: ObjectId) -> usize {
        if self.is_shut_down() {
            return 0;
        }

        let Some(mut state) = self.write_running() else {
            return 0;
        };
        let locations = state.by_owner.remove(&owner).unwrap_or_default();
        let mut evicted = 0;
        for location in locations {
            if let Some(handle) = state.by_location.remove(&location_key(location)) {
                if state.index.remove(handle).is_some() {
                    evicted += 1;
                }
            }
        }
        state.index.compact();
        debug!("evicted {evicted} cover points of owner {owner}");
        evicted
    }

    /// Remove every point
    pub fn reset_all(&self) {
        if self.is_shut_down() {
            return;
        }
        let Some(mut state) = self.write_running() else {
            return;
        };
        state.index.clear();
        state.by_location.clear();
        state.by_owner.clear();
        debug!("cover store reset");
    }

    /// Reserve the point at exactly `location`
    ///
    /// Returns `true` only if such a point exists and was not taken.
    pub fn hold(&self, location: Vec3) -> bool {
        self.with_handle(location, |index, handle| index.hold(handle))
    }

    /// Free the point at exactly `location`
    ///
    /// Returns `true` only if such a point exists and was taken.
    pub fn release(&self, location: Vec3) -> bool {
        self.with_handle(location, |index, handle| index.release(handle))
    }

    fn with_handle<F>(&self, location: Vec3, operation: F) -> bool
    where
        F: FnOnce(&mut CoverIndex, CoverPointHandle) -> bool,
    {
        if self.is_shut_down() {
            return false;
        }
        let Some(mut state) = self.write_running() else {
            return false;
        };
        match state.by_location.get(&location_key(location)).copied() {
            Some(handle) => operation(&mut state.index, handle),
            None => false,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|poisoned| {
            warn!("cover store lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Write guard, or `None` if the store was shut down while waiting for it
    fn write_running(&self) -> Option<RwLockWriteGuard<'_, StoreState>> {
        let state = self.write();
        (!self.is_shut_down()).then_some(state)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|poisoned| {
            warn!("cover store lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Root bounds of the underlying index
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cover_point::{CollisionClass, WorldObject};
    use crate::geometry::Sphere;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn store(dedup_radius: f32) -> CoverStore {
        CoverStore::new(Aabb::from_center_extent(Vec3::ZERO, Vec3::splat(64_000.0)), dedup_radius)
    }

    fn object(id: u64) -> Arc<WorldObject> {
        Arc::new(WorldObject::new(id, format!("crate-{id}"), CollisionClass::Static))
    }

    #[test]
    fn test_dedup_scenario() {
        let store = store(50.0);
        let wall = object(1);
        assert_eq!(store.add_points(vec![CoverPointDto::new(&wall, Vec3::ZERO, false)]), 1);
        assert_eq!(store.add_points(vec![CoverPointDto::new(&wall, Vec3::new(10.0, 0.0, 0.0), false)]), 0);
        assert_eq!(store.add_points(vec![CoverPointDto::new(&wall, Vec3::new(200.0, 0.0, 0.0), false)]), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_batch_dedups_against_itself() {
        let store = store(54.0);
        let wall = object(1);
        let batch = vec![
            CoverPointDto::new(&wall, Vec3::ZERO, false),
            CoverPointDto::new(&wall, Vec3::new(20.0, 0.0, 0.0), false),
            CoverPointDto::new(&wall, Vec3::new(60.0, 0.0, 0.0), false),
            CoverPointDto::new(&wall, Vec3::ZERO, true),
        ];
        assert_eq!(store.add_points(batch), 2);
        assert_eq!(store.owner_locations(ObjectId(1)).len(), 2);
    }

    #[test]
    fn test_spatial_query_scenario() {
        let store = store(50.0);
        let wall = object(1);
        store.add_points(vec![
            CoverPointDto::new(&wall, Vec3::ZERO, false),
            CoverPointDto::new(&wall, Vec3::new(100.0, 0.0, 0.0), false),
        ]);

        let found = store.find_points(&Sphere::new(Vec3::ZERO, 60.0).into());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].location, Vec3::ZERO);

        let boxed = store.find_points(&Aabb::new(Vec3::ZERO, Vec3::new(100.0, 0.0, 0.0)).into());
        assert_eq!(boxed.len(), 2, "box queries are boundary-inclusive");
    }

    #[test]
    fn test_reservation_invariant() {
        let store = store(50.0);
        let wall = object(1);
        store.add_points(vec![CoverPointDto::new(&wall, Vec3::new(5.0, 5.0, 0.0), false)]);
        let location = Vec3::new(5.0, 5.0, 0.0);
        let taken = |store: &CoverStore| {
            store.find_points(&Sphere::new(location, 1.0).into())[0].taken
        };

        assert!(!store.release(location));
        assert!(!taken(&store));
        assert!(store.hold(location));
        assert!(taken(&store));
        assert!(!store.hold(location));
        assert!(taken(&store));
        assert!(store.release(location));
        assert!(!taken(&store));

        // unknown locations never succeed
        assert!(!store.hold(Vec3::new(5.0, 5.0, 0.5)));
        assert!(!store.release(Vec3::new(500.0, 0.0, 0.0)));
    }

    #[test]
    fn test_negative_zero_addresses_same_point() {
        let store = store(50.0);
        let wall = object(1);
        store.add_points(vec![CoverPointDto::new(&wall, Vec3::ZERO, false)]);
        assert!(store.hold(Vec3::new(-0.0, 0.0, -0.0)));
    }

    #[test]
    fn test_concurrent_hold_race() {
        for _ in 0..50 {
            let store = Arc::new(store(50.0));
            let wall = object(1);
            store.add_points(vec![CoverPointDto::new(&wall, Vec3::ZERO, false)]);

            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        store.hold(Vec3::ZERO)
                    })
                })
                .collect();
            let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            assert_eq!(results.iter().filter(|&&won| won).count(), 1);
            assert!(store.find_points(&Sphere::new(Vec3::ZERO, 1.0).into())[0].taken);
        }
    }

    #[test]
    fn test_concurrent_batches_keep_dedup_invariant() {
        let store = Arc::new(store(54.0));
        let owners: Vec<Arc<WorldObject>> = (0..4).map(object).collect();

        let workers: Vec<_> = owners
            .iter()
            .enumerate()
            .map(|(seed, owner)| {
                let store = Arc::clone(&store);
                let owner = Arc::clone(owner);
                thread::spawn(move || {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed as u64);
                    for _ in 0..20 {
                        let batch = (0..25)
                            .map(|_| {
                                let location = Vec3::new(
                                    rng.gen_range(-800.0..800.0),
                                    rng.gen_range(-800.0..800.0),
                                    0.0,
                                );
                                CoverPointDto::new(&owner, location, false)
                            })
                            .collect();
                        store.add_points(batch);
                    }
                })
            })
            .collect();
        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    let points = store.find_points(&Sphere::new(Vec3::ZERO, 400.0).into());
                    assert!(points.iter().all(|p| p.location.length() <= 400.0));
                }
            })
        };
        for worker in workers {
            worker.join().unwrap();
        }
        reader.join().unwrap();

        let everything = store.find_points(&store.bounds().into());
        assert_eq!(everything.len(), store.len());
        for (i, a) in everything.iter().enumerate() {
            for b in &everything[i + 1..] {
                assert!(a.location.distance(b.location) >= 54.0);
            }
        }
        let by_owner: usize = owners.iter().map(|o| store.owner_locations(o.id).len()).sum();
        assert_eq!(by_owner, everything.len());
    }

    #[test]
    fn test_owner_eviction() {
        let store = store(50.0);
        let wall = object(1);
        let rock = object(2);
        store.add_points(vec![
            CoverPointDto::new(&wall, Vec3::ZERO, false),
            CoverPointDto::new(&wall, Vec3::new(100.0, 0.0, 0.0), false),
            CoverPointDto::new(&rock, Vec3::new(0.0, 100.0, 0.0), false),
        ]);

        assert_eq!(store.remove_points_of_owner(wall.id), 2);
        let remaining = store.find_points(&Aabb::from_center_extent(Vec3::ZERO, Vec3::splat(500.0)).into());
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|p| p.owner.id() != wall.id));
        assert!(!store.hold(Vec3::ZERO));
        assert!(store.owner_locations(wall.id).is_empty());

        assert_eq!(store.remove_points_of_owner(wall.id), 0);
    }

    #[test]
    fn test_stale_scenario() {
        let store = store(50.0);
        let doomed = object(1);
        let survivor = object(2);
        store.add_points(vec![
            CoverPointDto::new(&doomed, Vec3::ZERO, false),
            CoverPointDto::new(&survivor, Vec3::new(100.0, 0.0, 0.0), false),
        ]);
        drop(doomed);

        let area = Aabb::from_center_extent(Vec3::ZERO, Vec3::splat(200.0));
        assert_eq!(store.remove_stale_points(&area, |p| !p.owner.is_alive()), 1);

        let found = store.find_points(&area.into());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].owner.id(), survivor.id);
        assert!(store.owner_locations(ObjectId(1)).is_empty());
    }

    #[test]
    fn test_stale_area_is_enlarged() {
        let store = store(50.0);
        let doomed = object(1);
        store.add_points(vec![CoverPointDto::new(&doomed, Vec3::new(90.0, 0.0, 0.0), false)]);
        drop(doomed);

        // 100-wide box around the origin grows to reach x = 100
        let area = Aabb::from_center_extent(Vec3::ZERO, Vec3::splat(50.0));
        assert_eq!(store.remove_stale_points(&area, |p| !p.owner.is_alive()), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_reset_all() {
        let store = store(50.0);
        let wall = object(1);
        store.add_points(vec![CoverPointDto::new(&wall, Vec3::ZERO, false)]);
        store.reset_all();
        assert!(store.is_empty());
        assert!(!store.hold(Vec3::ZERO));
        assert_eq!(store.add_points(vec![CoverPointDto::new(&wall, Vec3::ZERO, false)]), 1);
    }

    #[test]
    fn test_shutdown_turns_operations_into_noops() {
        let store = store(50.0);
        let wall = object(1);
        store.add_points(vec![CoverPointDto::new(&wall, Vec3::ZERO, false)]);

        assert!(store.shutdown());
        assert!(!store.shutdown());
        assert_eq!(store.lifecycle(), Lifecycle::ShutDown);

        assert!(store.find_points(&Sphere::new(Vec3::ZERO, 10.0).into()).is_empty());
        assert!(!store.hold(Vec3::ZERO));
        assert_eq!(store.add_points(vec![CoverPointDto::new(&wall, Vec3::new(500.0, 0.0, 0.0), false)]), 0);
        assert_eq!(store.remove_points_of_owner(wall.id), 0);
        assert_eq!(store.len(), 1, "shutdown discards new work but keeps the data");
    }

    #[test]
    fn test_batch_merged_after_shutdown_is_discarded() {
        let store = store(50.0);
        let wall = object(1);
        store.add_points(vec![CoverPointDto::new(&wall, Vec3::ZERO, false)]);
        let batch = vec![
            CoverPointDto::new(&wall, Vec3::new(500.0, 0.0, 0.0), false),
            CoverPointDto::new(&wall, Vec3::new(900.0, 0.0, 0.0), false),
        ];

        store.shutdown();
        assert_eq!(store.add_points(batch), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_writers_waiting_on_the_lock_see_shutdown() {
        let store = Arc::new(store(50.0));
        let wall = object(1);
        store.add_points(vec![CoverPointDto::new(&wall, Vec3::ZERO, false)]);

        let reader = store.read();
        let merging = {
            let store = store.clone();
            let batch = vec![CoverPointDto::new(&wall, Vec3::new(500.0, 0.0, 0.0), false)];
            thread::spawn(move || store.add_points(batch))
        };
        let holding = {
            let store = store.clone();
            thread::spawn(move || store.hold(Vec3::ZERO))
        };
        // let both writers queue up behind the read guard
        thread::sleep(std::time::Duration::from_millis(50));
        let closing = {
            let store = store.clone();
            thread::spawn(move || store.shutdown())
        };
        while !store.is_shut_down() {
            thread::yield_now();
        }
        drop(reader);

        assert_eq!(merging.join().unwrap(), 0);
        assert!(!holding.join().unwrap());
        assert!(closing.join().unwrap());
        assert_eq!(store.len(), 1);
        let resident = store.read().index.query(&Sphere::new(Vec3::ZERO, 10.0).into());
        assert!(!resident[0].taken);
    }
}
