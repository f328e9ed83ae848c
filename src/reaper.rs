//! Revalidation of resident cover points
//!
//! A point stays resident only while the object that generated it is alive
//! and its location still projects onto the navigable surface. New geometry
//! placed on top of old cover, or a destroyed cover object, turns points stale.

use std::sync::Arc;

use glam::Vec3;

use crate::cover_point::CoverPoint;
use crate::geometry::Aabb;
use crate::navigation::NavigationQuery;
use crate::store::CoverStore;

/// Evicts stale cover points from a store
#[derive(Clone)]
pub struct StaleCoverReaper {
    navigation: Arc<dyn NavigationQuery>,
    tolerance: Vec3,
}

impl StaleCoverReaper {
    /// Create a reaper projecting with the given extent
    ///
    /// The extent is normally tight horizontally and as tall as the ground
    /// offset vertically, so a point only survives on the exact surface it
    /// was generated on.
    pub fn new(navigation: Arc<dyn NavigationQuery>, tolerance: Vec3) -> Self {
        Self {
            navigation,
            tolerance,
        }
    }

    /// Check whether a point lost its owner or its navigable ground
    pub fn is_stale(&self, point: &CoverPoint) -> bool {
        !point.owner.is_alive()
            || self
                .navigation
                .project_point(point.location, self.tolerance)
                .is_none()
    }

    /// Evict every stale point in `area`, enlarged by half its size
    ///
    /// # Returns
    ///
    /// Number of evicted points
    pub fn reap(&self, store: &CoverStore, area: &Aabb) -> usize {
        store.remove_stale_points(area, |point| self.is_stale(point))
    }

    /// Evict stale points around `origin`
    ///
    /// The area is a box centered at `origin` with half-extent `2 * extent`.
    pub fn reap_around(&self, store: &CoverStore, origin: Vec3, extent: Vec3) -> usize {
        self.reap(store, &Aabb::from_center_extent(origin, extent * 2.0))
    }
}

impl std::fmt::Debug for StaleCoverReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaleCoverReaper")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}
