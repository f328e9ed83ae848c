//! Cover system context
//!
//! [`CoverSystem`] owns the store and the generators and runs generation
//! jobs on a dedicated worker pool. It is cheap to clone; clones share the
//! same store and pool.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use glam::Vec3;
use log::{debug, error, info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::{CoverConfig, CoverQueryParams, EdgeWalkParams, ScanParams};
use crate::cover_point::{CoverPoint, ObjectId};
use crate::error::{CoverError, Result};
use crate::generation::{ActorBoundsGenerator, CoverSource, NavMeshEdgeWalker, TileCover};
use crate::geometry::{Aabb, QueryRegion};
use crate::navigation::{NavigationQuery, TileId};
use crate::physics::PhysicsQuery;
use crate::query::{CoverEventSink, CoverQueryEvaluator, CoverTarget, Requester};
use crate::reaper::StaleCoverReaper;
use crate::store::{CoverStore, Lifecycle};
use crate::tile_updates::{Cadence, TileSet, TileUpdateChannel};

struct Inner {
    config: CoverConfig,
    store: Arc<CoverStore>,
    pool: ThreadPool,
    reaper: StaleCoverReaper,
    scanner: ActorBoundsGenerator,
    edge_walker: NavMeshEdgeWalker,
    evaluator: CoverQueryEvaluator,
    in_flight: Mutex<usize>,
    drained: Condvar,
}

/// Cover generation, storage and queries for one world
///
/// # Example
///
/// ```
/// use cover_points::*;
/// use glam::{Vec2, Vec3};
/// use std::sync::Arc;
///
/// let navigation = Arc::new(RectNavMesh::new(Vec2::splat(-1000.0), 2000.0, 1, 1));
/// navigation.add_rect(NavRect::new(Vec2::splat(-1000.0), Vec2::splat(1000.0), 0.0));
/// let physics = Arc::new(ColliderWorld::new());
///
/// let system = CoverSystem::init(CoverConfig::default(), navigation, physics).unwrap();
/// assert!(system.find_cover_near(Aabb::from_center_extent(Vec3::ZERO, Vec3::splat(500.0))).is_empty());
///
/// assert!(system.teardown());
/// assert!(!system.hold_cover(Vec3::ZERO));
/// ```
#[derive(Clone)]
pub struct CoverSystem {
    inner: Arc<Inner>,
}

impl CoverSystem {
    /// Start a cover system with a fresh store and default scan parameters
    ///
    /// # Errors
    ///
    /// Returns `WorkerPool` if the generation threads cannot be spawned
    pub fn init(
        config: CoverConfig,
        navigation: Arc<dyn NavigationQuery>,
        physics: Arc<dyn PhysicsQuery>,
    ) -> Result<Self> {
        let store = Arc::new(CoverStore::from_config(&config));
        Self::with_store(config, ScanParams::default(), store, navigation, physics)
    }

    /// Start a cover system on an existing store
    ///
    /// # Errors
    ///
    /// - `ShutDown` if the store was already torn down
    /// - `InvalidConfig` if the scan parameters are invalid
    /// - `WorkerPool` if the generation threads cannot be spawned
    pub fn with_store(
        config: CoverConfig,
        scan: ScanParams,
        store: Arc<CoverStore>,
        navigation: Arc<dyn NavigationQuery>,
        physics: Arc<dyn PhysicsQuery>,
    ) -> Result<Self> {
        if store.is_shut_down() {
            return Err(CoverError::ShutDown);
        }
        scan.validate()?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("cover-gen-{i}"))
            .panic_handler(|payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("cover generation job panicked: {message}");
            })
            .build()
            .map_err(|e| CoverError::WorkerPool(e.to_string()))?;

        let inner = Inner {
            reaper: StaleCoverReaper::new(navigation.clone(), config.stale_tolerance),
            scanner: ActorBoundsGenerator::new(physics.clone(), navigation.clone(), scan),
            edge_walker: NavMeshEdgeWalker::new(
                physics.clone(),
                navigation.clone(),
                EdgeWalkParams::from_config(&config),
            ),
            evaluator: CoverQueryEvaluator::new(physics, navigation, config.ground_offset),
            config,
            store,
            pool,
            in_flight: Mutex::new(0),
            drained: Condvar::new(),
        };
        info!(
            "cover system started: {} workers, dedup radius {}",
            inner.pool.current_num_threads(),
            inner.store.dedup_radius()
        );
        Ok(Self { inner: Arc::new(inner) })
    }

    /// Route query diagnostics to `sink`
    ///
    /// Only affects this handle and the clones made from it afterwards.
    pub fn with_event_sink(self, sink: Arc<dyn CoverEventSink>) -> Result<Self> {
        let inner = Arc::try_unwrap(self.inner).map_err(|_| {
            CoverError::InvalidConfig("event sink must be set before the system is shared".to_string())
        })?;
        let inner = Inner {
            evaluator: inner.evaluator.with_sink(sink),
            ..inner
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    /// Shut the store down
    ///
    /// Every later operation is a no-op and results of jobs still running
    /// are discarded. Returns `true` only for the call that shut it down.
    pub fn teardown(&self) -> bool {
        let first = self.inner.store.shutdown();
        if first {
            info!("cover system shut down with {} resident points", self.inner.store.len());
        }
        first
    }

    /// Current lifecycle state
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.store.lifecycle()
    }

    /// Configuration the system was started with
    pub fn config(&self) -> &CoverConfig {
        &self.inner.config
    }

    /// Shared cover store
    pub fn store(&self) -> &Arc<CoverStore> {
        &self.inner.store
    }

    /// Resident points inside a box or sphere
    pub fn find_cover_near(&self, region: impl Into<QueryRegion>) -> Vec<CoverPoint> {
        self.inner.store.find_points(&region.into())
    }

    /// Reserve the point at `location`
    pub fn hold_cover(&self, location: Vec3) -> bool {
        self.inner.store.hold(location)
    }

    /// Free the point at `location`
    pub fn release_cover(&self, location: Vec3) -> bool {
        self.inner.store.release(location)
    }

    /// Evict every point generated by `owner`
    pub fn remove_cover_of_owner(&self, owner: ObjectId) -> usize {
        self.inner.store.remove_points_of_owner(owner)
    }

    /// Evict stale points in `area`, enlarged by half its size
    pub fn remove_stale_cover(&self, area: &Aabb) -> usize {
        self.inner.reaper.reap(&self.inner.store, area)
    }

    /// Evict stale points in a box around `origin` with half-extent `2 * extent`
    pub fn remove_stale_cover_around(&self, origin: Vec3, extent: Vec3) -> usize {
        self.inner.reaper.reap_around(&self.inner.store, origin, extent)
    }

    /// Drop every resident point
    pub fn reset_all(&self) {
        self.inner.store.reset_all();
    }

    /// Find and reserve the best cover point for `requester` against `target`
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `params` fail validation
    pub fn find_best_cover(
        &self,
        requester: &mut Requester,
        target: &CoverTarget,
        params: &CoverQueryParams,
    ) -> Result<Option<Vec3>> {
        self.inner
            .evaluator
            .find_best_cover(&self.inner.store, requester, target, params)
    }

    /// Queue cover generation around an object
    pub fn generate_cover_for_object(&self, source: CoverSource) {
        Inner::spawn(&self.inner, move |inner| {
            inner.generate_for_object(&source);
        });
    }

    /// Generate cover around an object on the calling thread
    ///
    /// Returns the number of points merged into the store.
    pub fn generate_cover_for_object_blocking(&self, source: &CoverSource) -> usize {
        self.inner.generate_for_object(source)
    }

    /// Queue one edge walk per tile
    pub fn regenerate_tiles(&self, tiles: &TileSet) {
        Inner::regenerate_tiles(&self.inner, tiles);
    }

    /// Walk the given tiles on the calling thread
    ///
    /// Returns the number of points merged into the store.
    pub fn regenerate_tiles_blocking(&self, tiles: &TileSet) -> usize {
        tiles.iter().map(|&tile| self.inner.regenerate_tile(tile)).sum()
    }

    /// Block until every queued generation job finished
    pub fn wait_for_generation(&self) {
        let mut in_flight = self.inner.lock_in_flight();
        while *in_flight > 0 {
            in_flight = self
                .inner
                .drained
                .wait(in_flight)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Regenerate tiles whenever `channel` flushes its interval buffer
    ///
    /// The subscription does not keep the system alive.
    pub fn subscribe(&self, channel: &TileUpdateChannel) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        channel.subscribe(Cadence::Interval, move |tiles| {
            if let Some(inner) = weak.upgrade() {
                Inner::regenerate_tiles(&inner, tiles);
            }
        });
    }
}

impl std::fmt::Debug for CoverSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverSystem")
            .field("lifecycle", &self.lifecycle())
            .field("points", &self.inner.store.len())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn spawn<F>(this: &Arc<Self>, job: F)
    where
        F: FnOnce(&Inner) + Send + 'static,
    {
        if this.store.is_shut_down() {
            return;
        }
        *this.lock_in_flight() += 1;
        let inner = this.clone();
        this.pool.spawn(move || {
            let _done = JobDone(&inner);
            job(&inner);
        });
    }

    fn regenerate_tiles(this: &Arc<Self>, tiles: &TileSet) {
        debug!("queueing {} tiles for cover generation", tiles.len());
        for &tile in tiles {
            Inner::spawn(this, move |inner| {
                inner.regenerate_tile(tile);
            });
        }
    }

    /// Walk, reap the tile area, merge
    fn regenerate_tile(&self, tile: TileId) -> usize {
        if self.store.is_shut_down() {
            return 0;
        }
        let TileCover { area, points } = self.edge_walker.walk_tile(tile);

        if let Some(area) = area {
            if self.store.is_shut_down() {
                return 0;
            }
            self.reaper.reap(&self.store, &area);
        }
        if self.store.is_shut_down() {
            return 0;
        }
        self.store.add_points(points)
    }

    fn generate_for_object(&self, source: &CoverSource) -> usize {
        if self.store.is_shut_down() {
            return 0;
        }
        let batch = self.scanner.generate(source);
        if self.store.is_shut_down() {
            return 0;
        }
        self.store.add_points(batch)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, usize> {
        self.in_flight.lock().unwrap_or_else(|poisoned| {
            warn!("generation counter lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}

/// Marks a job finished when dropped, also while unwinding from a panic
struct JobDone<'a>(&'a Inner);

impl Drop for JobDone<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.0.lock_in_flight();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.0.drained.notify_all();
        }
    }
}
