//! Navigation collaborator
//!
//! The cover system consumes navigation through [`NavigationQuery`]: surface
//! projection, path reachability and per-tile boundary edges. [`RectNavMesh`]
//! is a small reference implementation made of walkable axis-aligned
//! rectangles laid over a square tile grid.

use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use glam::{Vec2, Vec3};
use log::warn;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::geometry::Aabb;

/// Index of a navigation tile
pub type TileId = u32;

/// Movement capabilities of an agent, used by path queries
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentProfile {
    /// Capsule radius
    pub radius: f32,
    /// Capsule height
    pub height: f32,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            radius: 35.0,
            height: 180.0,
        }
    }
}

/// Queries the cover system issues against the navigation data
///
/// Implementations must be callable from generation workers and query
/// threads at the same time.
pub trait NavigationQuery: Send + Sync {
    /// Project a point onto the navigable surface
    ///
    /// Only surface within `extent` of `point` on each axis is considered.
    /// Returns the projected location, or `None` if there is no surface nearby.
    fn project_point(&self, point: Vec3, extent: Vec3) -> Option<Vec3>;

    /// Check whether `agent` can walk from `from` to `to`
    fn test_path(&self, agent: &AgentProfile, from: Vec3, to: Vec3) -> bool;

    /// Boundary edges of a tile as vertex pairs
    ///
    /// An edge borders non-navigable space on at least one side.
    fn tile_boundary_edges(&self, tile: TileId) -> Vec<[Vec3; 2]>;

    /// Bounding box of a tile, if the tile exists
    fn tile_bounds(&self, tile: TileId) -> Option<Aabb>;

    /// Height of a navigation tile; zero when the navmesh does not use one
    fn tile_height(&self) -> f32;
}

/// Handle of a walkable rectangle in a [`RectNavMesh`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RectId(usize);

/// Walkable axis-aligned rectangle at a fixed height
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavRect {
    /// Minimum X/Y corner
    pub min: Vec2,
    /// Maximum X/Y corner
    pub max: Vec2,
    /// Height of the walkable surface
    pub z: f32,
}

impl NavRect {
    /// Create a rectangle from two corners in any order
    pub fn new(a: Vec2, b: Vec2, z: f32) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
            z,
        }
    }

    fn closest_point(&self, point: Vec3) -> Vec3 {
        point.truncate().clamp(self.min, self.max).extend(self.z)
    }

    fn overlaps_2d(&self, min: Vec2, max: Vec2) -> bool {
        self.min.cmple(max).all() && min.cmple(self.max).all()
    }
}

const EDGE_EPSILON: f32 = 1e-3;

#[derive(Debug, Default)]
struct MeshState {
    rects: Vec<Option<NavRect>>,
    /// Vertical range ever covered by the mesh; never shrinks
    z_range: Option<(f32, f32)>,
}

impl MeshState {
    fn live(&self) -> impl Iterator<Item = (usize, &NavRect)> + '_ {
        self.rects
            .iter()
            .enumerate()
            .filter_map(|(i, rect)| rect.as_ref().map(|r| (i, r)))
    }
}

/// Navigation mesh made of walkable rectangles on a tile grid
///
/// Rectangles that touch in X/Y and lie within `step_height` of each other
/// are connected. Mutation goes through `&self` so the mesh can be shared
/// with the cover system while the host edits it.
///
/// # Example
///
/// ```
/// use cover_points::*;
/// use glam::{Vec2, Vec3};
///
/// let mesh = RectNavMesh::new(Vec2::ZERO, 1000.0, 2, 2);
/// let (_, dirty) = mesh.add_rect(NavRect::new(Vec2::ZERO, Vec2::splat(500.0), 0.0));
/// assert_eq!(dirty, vec![0]);
///
/// let projected = mesh.project_point(Vec3::new(100.0, 100.0, 5.0), Vec3::splat(10.0));
/// assert_eq!(projected, Some(Vec3::new(100.0, 100.0, 0.0)));
/// ```
#[derive(Debug)]
pub struct RectNavMesh {
    origin: Vec2,
    tile_size: f32,
    tiles_x: u32,
    tiles_y: u32,
    tile_height: f32,
    step_height: f32,
    state: RwLock<MeshState>,
}

impl RectNavMesh {
    /// Create an empty mesh over a `tiles_x` by `tiles_y` grid starting at `origin`
    pub fn new(origin: Vec2, tile_size: f32, tiles_x: u32, tiles_y: u32) -> Self {
        Self {
            origin,
            tile_size: tile_size.max(EDGE_EPSILON),
            tiles_x: tiles_x.max(1),
            tiles_y: tiles_y.max(1),
            tile_height: 0.0,
            step_height: 30.0,
            state: RwLock::new(MeshState::default()),
        }
    }

    /// Set the tile height reported to the edge walker
    pub fn with_tile_height(mut self, height: f32) -> Self {
        self.tile_height = height.max(0.0);
        self
    }

    /// Set the largest height difference between connected rectangles
    pub fn with_step_height(mut self, height: f32) -> Self {
        self.step_height = height.max(0.0);
        self
    }

    /// Number of tiles in the grid
    pub fn tile_count(&self) -> u32 {
        self.tiles_x * self.tiles_y
    }

    /// Add a walkable rectangle
    ///
    /// # Returns
    ///
    /// The rectangle's handle and the tiles it touches, which are now dirty.
    pub fn add_rect(&self, rect: NavRect) -> (RectId, Vec<TileId>) {
        let mut state = self.write();
        state.rects.push(Some(rect));
        state.z_range = Some(match state.z_range {
            Some((low, high)) => (low.min(rect.z), high.max(rect.z)),
            None => (rect.z, rect.z),
        });
        let id = RectId(state.rects.len() - 1);
        drop(state);
        (id, self.tiles_overlapping(rect.min, rect.max))
    }

    /// Remove a walkable rectangle, returning the tiles it touched
    ///
    /// Removing an unknown or already removed rectangle touches nothing.
    pub fn remove_rect(&self, id: RectId) -> Vec<TileId> {
        let removed = self.write().rects.get_mut(id.0).and_then(Option::take);
        match removed {
            Some(rect) => self.tiles_overlapping(rect.min, rect.max),
            None => Vec::new(),
        }
    }

    /// Tile containing a point, if the point lies on the grid
    pub fn tile_at(&self, point: Vec3) -> Option<TileId> {
        let local = (point.truncate() - self.origin) / self.tile_size;
        if local.x < 0.0 || local.y < 0.0 {
            return None;
        }
        let (tx, ty) = (local.x as u32, local.y as u32);
        (tx < self.tiles_x && ty < self.tiles_y).then(|| ty * self.tiles_x + tx)
    }

    /// All tiles whose area overlaps the given X/Y range
    pub fn tiles_overlapping(&self, min: Vec2, max: Vec2) -> Vec<TileId> {
        let grid_max = Vec2::new(self.tiles_x as f32, self.tiles_y as f32) - 1.0;
        let low = ((min - self.origin) / self.tile_size).floor().clamp(Vec2::ZERO, grid_max);
        let high = ((max - self.origin) / self.tile_size).floor().clamp(Vec2::ZERO, grid_max);
        let mut tiles = Vec::new();
        for ty in low.y as u32..=high.y as u32 {
            for tx in low.x as u32..=high.x as u32 {
                let (tile_min, tile_max) = self.tile_area(ty * self.tiles_x + tx);
                if tile_min.cmple(max).all() && min.cmple(tile_max).all() {
                    tiles.push(ty * self.tiles_x + tx);
                }
            }
        }
        tiles
    }

    fn tile_area(&self, tile: TileId) -> (Vec2, Vec2) {
        let tx = tile % self.tiles_x;
        let ty = tile / self.tiles_x;
        let min = self.origin + Vec2::new(tx as f32, ty as f32) * self.tile_size;
        (min, min + Vec2::splat(self.tile_size))
    }

    /// Whether a side at `value` on `axis` is walked as part of `tile`
    ///
    /// Tile areas are half-open, except at the far border of the grid, so a
    /// side lying on a shared tile border belongs to exactly one tile.
    fn owns_coordinate(&self, tile: TileId, axis: usize, value: f32) -> bool {
        let (tile_min, tile_max) = self.tile_area(tile);
        let last = if axis == 0 {
            tile % self.tiles_x == self.tiles_x - 1
        } else {
            tile / self.tiles_x == self.tiles_y - 1
        };
        value >= tile_min[axis] && (value < tile_max[axis] || (last && value <= tile_max[axis]))
    }

    fn read(&self) -> RwLockReadGuard<'_, MeshState> {
        self.state.read().unwrap_or_else(|poisoned| {
            warn!("navmesh lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, MeshState> {
        self.state.write().unwrap_or_else(|poisoned| {
            warn!("navmesh lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn connected(&self, a: &NavRect, b: &NavRect) -> bool {
        (a.z - b.z).abs() <= self.step_height && a.overlaps_2d(b.min, b.max)
    }

    /// Connected-component label of every live rectangle
    fn components(&self, state: &MeshState) -> Vec<usize> {
        let mut parent: Vec<usize> = (0..state.rects.len()).collect();

        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        let live: Vec<(usize, &NavRect)> = state.live().collect();
        for (n, &(i, a)) in live.iter().enumerate() {
            for &(j, b) in &live[n + 1..] {
                if self.connected(a, b) {
                    let (root_a, root_b) = (find(&mut parent, i), find(&mut parent, j));
                    parent[root_a] = root_b;
                }
            }
        }
        (0..parent.len()).map(|i| find(&mut parent, i)).collect()
    }

    fn nearest_rect(&self, state: &MeshState, point: Vec3, extent: Vec3) -> Option<(usize, Vec3)> {
        state
            .live()
            .filter(|(_, rect)| {
                (point.z - rect.z).abs() <= extent.z + EDGE_EPSILON
                    && rect.overlaps_2d(point.truncate() - extent.truncate(), point.truncate() + extent.truncate())
            })
            .map(|(i, rect)| (i, rect.closest_point(point)))
            .min_by(|(_, a), (_, b)| {
                a.distance_squared(point).total_cmp(&b.distance_squared(point))
            })
    }

    /// Parts of one rectangle side not covered by a connected neighbor
    ///
    /// `fixed` is the side's constant coordinate on `axis`, `outward` the
    /// sign pointing away from the rectangle.
    fn open_spans(
        &self,
        state: &MeshState,
        owner: usize,
        axis: usize,
        fixed: f32,
        outward: f32,
        span: (f32, f32),
    ) -> Vec<(f32, f32)> {
        let rect = match state.rects[owner] {
            Some(rect) => rect,
            None => return Vec::new(),
        };
        let other = 1 - axis;
        let mut cuts = Vec::new();
        for (i, neighbor) in state.live() {
            if i == owner || (neighbor.z - rect.z).abs() > self.step_height {
                continue;
            }
            // neighbor must cover the area just outside this side
            let probe = fixed + outward * EDGE_EPSILON * 10.0;
            if probe < neighbor.min[axis] || probe > neighbor.max[axis] {
                continue;
            }
            cuts.push((neighbor.min[other], neighbor.max[other]));
        }
        subtract_intervals(span, &mut cuts)
    }
}

/// Remove every cut from `span`, dropping leftovers shorter than the edge epsilon
fn subtract_intervals(span: (f32, f32), cuts: &mut [(f32, f32)]) -> Vec<(f32, f32)> {
    cuts.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut result = Vec::new();
    let mut cursor = span.0;
    for &(start, end) in cuts.iter() {
        if end <= cursor || start >= span.1 {
            continue;
        }
        if start > cursor + EDGE_EPSILON {
            result.push((cursor, start.min(span.1)));
        }
        cursor = cursor.max(end);
        if cursor >= span.1 {
            break;
        }
    }
    if span.1 > cursor + EDGE_EPSILON {
        result.push((cursor, span.1));
    }
    result
}

impl NavigationQuery for RectNavMesh {
    fn project_point(&self, point: Vec3, extent: Vec3) -> Option<Vec3> {
        let state = self.read();
        self.nearest_rect(&state, point, extent).map(|(_, location)| location)
    }

    fn test_path(&self, agent: &AgentProfile, from: Vec3, to: Vec3) -> bool {
        let state = self.read();
        let extent = Vec3::new(agent.radius, agent.radius, agent.height);
        let (Some((start, _)), Some((goal, _))) = (
            self.nearest_rect(&state, from, extent),
            self.nearest_rect(&state, to, extent),
        ) else {
            return false;
        };
        if start == goal {
            return true;
        }
        let components = self.components(&state);
        components[start] == components[goal]
    }

    fn tile_boundary_edges(&self, tile: TileId) -> Vec<[Vec3; 2]> {
        if tile >= self.tile_count() {
            return Vec::new();
        }
        let (tile_min, tile_max) = self.tile_area(tile);
        let state = self.read();
        let mut edges = Vec::new();

        for (i, rect) in state.live() {
            if !rect.overlaps_2d(tile_min, tile_max) {
                continue;
            }
            // counter-clockwise, so the outside is always on the right
            let sides = [
                (1usize, rect.min.y, -1.0f32, (rect.min.x, rect.max.x), false),
                (0, rect.max.x, 1.0, (rect.min.y, rect.max.y), false),
                (1, rect.max.y, 1.0, (rect.min.x, rect.max.x), true),
                (0, rect.min.x, -1.0, (rect.min.y, rect.max.y), true),
            ];
            for (axis, fixed, outward, span, reversed) in sides {
                if !self.owns_coordinate(tile, axis, fixed) {
                    continue;
                }
                let other = 1 - axis;
                let clipped = (span.0.max(tile_min[other]), span.1.min(tile_max[other]));
                if clipped.1 - clipped.0 <= EDGE_EPSILON {
                    continue;
                }
                for (start, end) in self.open_spans(&state, i, axis, fixed, outward, clipped) {
                    let point = |along: f32| {
                        let mut xy = Vec2::ZERO;
                        xy[axis] = fixed;
                        xy[other] = along;
                        xy.extend(rect.z)
                    };
                    if reversed {
                        edges.push([point(end), point(start)]);
                    } else {
                        edges.push([point(start), point(end)]);
                    }
                }
            }
        }
        edges
    }

    fn tile_bounds(&self, tile: TileId) -> Option<Aabb> {
        if tile >= self.tile_count() {
            return None;
        }
        let (min, max) = self.tile_area(tile);
        let (low, high) = self.read().z_range.unwrap_or((0.0, 0.0));
        Some(Aabb::new(min.extend(low), max.extend(high)))
    }

    fn tile_height(&self) -> f32 {
        self.tile_height
    }
}

/// Tiles touched by a set of rectangles, deduplicated and sorted
pub fn dirty_tiles<I>(tiles: I) -> Vec<TileId>
where
    I: IntoIterator<Item = TileId>,
{
    tiles.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}
