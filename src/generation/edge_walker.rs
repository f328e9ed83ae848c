//! Cover generation by walking navmesh boundary edges
//!
//! Boundary edges border non-navigable space. Stepping along them and probing
//! sideways finds the geometry that carved the hole: walls, rocks, buildings,
//! or a ledge dropping down to lower ground.

use std::sync::Arc;

use glam::Vec3;
use log::{debug, trace};

use crate::config::EdgeWalkParams;
use crate::cover_point::CoverPointDto;
use crate::geometry::{perpendicular, rotate_horizontal, Aabb};
use crate::navigation::{NavigationQuery, TileId};
use crate::physics::{PhysicsQuery, TraceChannel};

/// Horizontal extent of the navmesh hole probe
const HOLE_PROBE_EXTENT: f32 = 0.1;

/// Cover found along the edges of one navmesh tile
#[derive(Debug, Clone, Default)]
pub struct TileCover {
    /// Tile bounds, grown vertically by half the tile height
    ///
    /// `None` when the navmesh does not know the tile.
    pub area: Option<Aabb>,
    /// Generated cover points
    pub points: Vec<CoverPointDto>,
}

/// Walks boundary edges of navmesh tiles
pub struct NavMeshEdgeWalker {
    physics: Arc<dyn PhysicsQuery>,
    navigation: Arc<dyn NavigationQuery>,
    params: EdgeWalkParams,
}

impl NavMeshEdgeWalker {
    /// Create an edge walker
    pub fn new(physics: Arc<dyn PhysicsQuery>, navigation: Arc<dyn NavigationQuery>, params: EdgeWalkParams) -> Self {
        Self {
            physics,
            navigation,
            params,
        }
    }

    /// Walk parameters
    pub fn params(&self) -> &EdgeWalkParams {
        &self.params
    }

    /// Generate cover along every boundary edge of a tile
    ///
    /// # Returns
    ///
    /// The tile area to revalidate for stale cover, and the generated batch
    pub fn walk_tile(&self, tile: TileId) -> TileCover {
        let edges = self.navigation.tile_boundary_edges(tile);
        let points = self.walk_edges(&edges);

        let tile_height = self.navigation.tile_height();
        let area = self.navigation.tile_bounds(tile).map(|bounds| {
            if tile_height > 0.0 {
                bounds.expand_by(Vec3::new(0.0, 0.0, tile_height * 0.5))
            } else {
                bounds
            }
        });

        debug!(
            "tile {tile}: {} boundary edges, {} cover points",
            edges.len(),
            points.len()
        );
        TileCover { area, points }
    }

    /// Generate cover along a list of boundary edges
    pub fn walk_edges(&self, edges: &[[Vec3; 2]]) -> Vec<CoverPointDto> {
        let spacing = self.params.cover_spacing;
        let lift = Vec3::Z * self.params.ground_offset;
        let mut batch = Vec::new();

        for &[start, end] in edges {
            let edge = end - start;
            let length = edge.length();
            if length <= f32::EPSILON {
                trace!("skipping degenerate edge at {}", start);
                continue;
            }
            let direction = edge / length;

            let steps = (length / spacing).floor() as usize;
            for step in 0..steps {
                self.process_step(start + direction * (step as f32 * spacing) + lift, direction, &mut batch);
            }
            if steps == 0 {
                self.process_step(start + lift, direction, &mut batch);
            }

            // the loop above stops short of the end vertex
            self.process_step(end + lift, direction, &mut batch);
            // corners
            self.process_step(end + lift, rotate_horizontal(direction, 45.0), &mut batch);
        }
        batch
    }

    /// Probe both sides of one step; the first side yielding cover wins
    fn process_step(&self, step: Vec3, direction: Vec3, batch: &mut Vec<CoverPointDto>) {
        if !self.params.map_bounds.contains(step) {
            return;
        }
        let side = perpendicular(direction);
        for sign in [1.0, -1.0] {
            if let Some(dto) = self.scan_side(step, side * sign) {
                batch.push(dto);
                return;
            }
        }
    }

    /// Look for cover on one side of a step point
    fn scan_side(&self, start: Vec3, direction: Vec3) -> Option<CoverPointDto> {
        let hole_probe = start + direction * self.params.hole_check_reach;
        let hole_extent = Vec3::new(HOLE_PROBE_EXTENT, HOLE_PROBE_EXTENT, self.params.ground_probe_depth);
        if self.navigation.project_point(hole_probe, hole_extent).is_some() {
            // still navigable on this side
            return None;
        }

        let agent_height = Vec3::Z * self.params.smallest_agent_height;
        let reach = start + direction * self.params.scan_reach;
        let mut hit = self
            .physics
            .raycast(start + agent_height, reach + agent_height, TraceChannel::Geometry, None);

        if hit.is_none() && self.is_cliff_edge(hole_probe, direction) {
            // the ground object behind the ledge owns the point
            let below = start - Vec3::Z * self.params.ground_probe_depth;
            hit = self.physics.raycast(start, below, TraceChannel::Geometry, None);
        }

        let hit = hit?;
        if hit.object.is_force_field() {
            trace!("rejecting edge cover at {} behind force field {}", start, hit.object.label);
            return None;
        }
        Some(CoverPointDto::new(&hit.object, start, false))
    }

    /// A straight drop finds nothing, while a slanted probe further out lands on ground
    fn is_cliff_edge(&self, hole_probe: Vec3, direction: Vec3) -> bool {
        let agent_height = Vec3::Z * self.params.smallest_agent_height;
        let cliff_start = hole_probe + direction * self.params.cliff_edge_distance;

        let straight = self
            .physics
            .raycast(cliff_start, cliff_start - agent_height, TraceChannel::Geometry, None);
        if straight.is_some() {
            return false;
        }

        let slanted_end = cliff_start - agent_height + direction * self.params.straight_cliff_tolerance;
        self.physics
            .raycast(cliff_start, slanted_end, TraceChannel::Geometry, None)
            .is_some()
    }
}

impl std::fmt::Debug for NavMeshEdgeWalker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavMeshEdgeWalker")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
