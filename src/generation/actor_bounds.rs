//! Cover generation from an object's bounding volume
//!
//! The volume is covered by a 3D grid. Every grid column finds its ground
//! and checks whether something overhangs it between the minimum passable
//! height and the agent height. A free ground point right next to a blocked
//! one sits at the foot of a vertical surface tall enough to hide behind.

use std::sync::Arc;

use glam::Vec3;
use log::{debug, trace};

use crate::config::ScanParams;
use crate::cover_point::{CoverPointDto, WorldObject};
use crate::geometry::{nearly_equal, Aabb};
use crate::navigation::NavigationQuery;
use crate::physics::{ColliderWorld, PhysicsQuery, TraceChannel};

use super::free_cells::FreeCells;

/// Object to generate cover for, with its bounding volumes
#[derive(Debug, Clone)]
pub struct CoverSource {
    /// Object that will own the generated points
    pub object: Arc<WorldObject>,
    /// Bounds of the whole object
    pub bounds: Aabb,
    /// Bounds of each sub-mesh, used when scanning per mesh
    pub mesh_bounds: Vec<Aabb>,
}

impl CoverSource {
    /// Source scanned as a single volume
    pub fn new(object: Arc<WorldObject>, bounds: Aabb) -> Self {
        Self {
            object,
            bounds,
            mesh_bounds: vec![bounds],
        }
    }

    /// Attach per-mesh volumes
    pub fn with_mesh_bounds(mut self, mesh_bounds: Vec<Aabb>) -> Self {
        self.mesh_bounds = mesh_bounds;
        self
    }

    /// Build a source from the colliders an object owns in a [`ColliderWorld`]
    ///
    /// Each collider box becomes one mesh volume. Returns `None` if the
    /// object has no colliders.
    pub fn from_colliders(world: &ColliderWorld, object: Arc<WorldObject>) -> Option<Self> {
        let bounds = world.bounds_of(object.id)?;
        let boxes = world.boxes_of(object.id);
        Some(Self::new(object, bounds).with_mesh_bounds(boxes))
    }
}

/// Grid-raycast scan of bounding volumes
pub struct ActorBoundsGenerator {
    physics: Arc<dyn PhysicsQuery>,
    navigation: Arc<dyn NavigationQuery>,
    params: ScanParams,
}

impl ActorBoundsGenerator {
    /// Create a generator
    pub fn new(physics: Arc<dyn PhysicsQuery>, navigation: Arc<dyn NavigationQuery>, params: ScanParams) -> Self {
        Self {
            physics,
            navigation,
            params,
        }
    }

    /// Scan parameters
    pub fn params(&self) -> &ScanParams {
        &self.params
    }

    /// Generate a batch of cover points around a source
    ///
    /// Volumes smaller than one grid unit on any axis are skipped. The batch
    /// is deduplicated with a tolerance of half a grid unit; the store
    /// applies its own dedup radius on merge.
    pub fn generate(&self, source: &CoverSource) -> Vec<CoverPointDto> {
        let volumes: Vec<Aabb> = if self.params.per_mesh {
            source.mesh_bounds.clone()
        } else {
            vec![source.bounds]
        };

        let mut batch = Vec::new();
        for volume in volumes {
            if volume.size().min_element() < self.params.grid_unit {
                trace!(
                    "skipping volume of {} smaller than the scan grid ({:?})",
                    source.object.label,
                    volume.size()
                );
                continue;
            }
            self.scan_volume(&source.object, volume, &mut batch);
        }
        debug!("generated {} cover points around {}", batch.len(), source.object.label);
        batch
    }

    fn scan_volume(&self, owner: &Arc<WorldObject>, volume: Aabb, batch: &mut Vec<CoverPointDto>) {
        let grid = self.params.grid_unit;
        let volume = volume.expand_by(Vec3::splat(grid * self.params.bounds_expansion));
        let counts = (volume.size() / grid).floor().as_uvec3() + 2;
        let projection_extent = Vec3::new(grid * 5.0, grid * 5.0, grid * 1.5);
        let tolerance = grid * 0.5;

        let mut free = Vec::new();
        let mut blocked = Vec::new();
        for x in 0..counts.x {
            for y in 0..counts.y {
                let column = volume.min + Vec3::new(x as f32, y as f32, 0.0) * grid;
                let Some(ground) = self.topmost_ground(owner, column, counts.z) else {
                    continue;
                };
                // start above the surface, not inside it
                let ground = ground + Vec3::Z;
                if self.is_overhung(ground) {
                    blocked.push(ground);
                } else {
                    free.push(ground);
                }
            }
        }
        if blocked.is_empty() {
            trace!("no blocked grid points around {}", owner.label);
            return;
        }

        let free = FreeCells::new(free);
        trace!(
            "{} free and {} blocked grid points around {}",
            free.len(),
            blocked.len(),
            owner.label
        );
        let mut candidates: Vec<Vec3> = Vec::new();
        for &point in &blocked {
            for dx in -1..=1 {
                for dy in -1..=1 {
                    for dz in -1..=1 {
                        if dx == 0 && dy == 0 && dz == 0 {
                            continue;
                        }
                        let neighbor = point + Vec3::new(dx as f32, dy as f32, dz as f32) * grid;
                        for candidate in free.near(neighbor, tolerance) {
                            if !candidates.iter().any(|c| nearly_equal(*c, candidate, tolerance)) {
                                candidates.push(candidate);
                            }
                        }
                    }
                }
            }
        }

        for candidate in candidates {
            let Some(location) = self.navigation.project_point(candidate, projection_extent) else {
                trace!("candidate at {} does not project onto the navmesh", candidate);
                continue;
            };
            if batch.iter().any(|dto| nearly_equal(dto.location, location, tolerance)) {
                continue;
            }
            batch.push(CoverPointDto::new(owner, location, owner.is_force_field()));
        }
    }

    /// Highest ground contact found by probing down one grid unit from each z-level
    fn topmost_ground(&self, owner: &WorldObject, column: Vec3, levels: u32) -> Option<Vec3> {
        let grid = self.params.grid_unit;
        (0..levels)
            .filter_map(|z| {
                let start = column + Vec3::Z * (z as f32 * grid);
                self.physics
                    .raycast(start, start - Vec3::Z * grid, TraceChannel::Geometry, Some(owner.id))
                    .filter(|hit| !hit.start_penetrating)
                    .map(|hit| hit.location)
            })
            .max_by(|a, b| a.z.total_cmp(&b.z))
    }

    /// Check whether anything blocks the space an agent needs above a ground point
    fn is_overhung(&self, ground: Vec3) -> bool {
        let start = ground + Vec3::Z * self.params.min_passable_height;
        let end = ground + Vec3::Z * self.params.smallest_agent_height;
        self.physics.raycast(start, end, TraceChannel::Geometry, None).is_some()
    }
}

impl std::fmt::Debug for ActorBoundsGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorBoundsGenerator")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cover_point::CollisionClass;
    use crate::navigation::{NavRect, RectNavMesh};
    use glam::Vec2;

    /// Flat floor at z = 0 with a walkable ring around a 200 x 200 hole at the origin
    fn fixture() -> (Arc<ColliderWorld>, Arc<RectNavMesh>) {
        let world = Arc::new(ColliderWorld::new());
        let floor = Arc::new(WorldObject::new(100, "floor", CollisionClass::Static));
        world.add_box(floor, Vec3::new(0.0, 0.0, -10.0), Vec3::new(2000.0, 2000.0, 10.0));

        let mesh = Arc::new(RectNavMesh::new(Vec2::splat(-1000.0), 2000.0, 1, 1));
        mesh.add_rect(NavRect::new(Vec2::new(-1000.0, -1000.0), Vec2::new(1000.0, -100.0), 0.0));
        mesh.add_rect(NavRect::new(Vec2::new(-1000.0, 100.0), Vec2::new(1000.0, 1000.0), 0.0));
        mesh.add_rect(NavRect::new(Vec2::new(-1000.0, -100.0), Vec2::new(-100.0, 100.0), 0.0));
        mesh.add_rect(NavRect::new(Vec2::new(100.0, -100.0), Vec2::new(1000.0, 100.0), 0.0));
        (world, mesh)
    }

    fn generator(world: &Arc<ColliderWorld>, mesh: &Arc<RectNavMesh>, params: ScanParams) -> ActorBoundsGenerator {
        ActorBoundsGenerator::new(world.clone(), mesh.clone(), params)
    }

    #[test]
    fn test_tall_crate_yields_ring_of_cover() {
        let (world, mesh) = fixture();
        let crate_obj = Arc::new(WorldObject::new(1, "crate", CollisionClass::Static));
        world.add_box(crate_obj.clone(), Vec3::new(0.0, 0.0, 100.0), Vec3::splat(100.0));

        let source = CoverSource::from_colliders(&world, crate_obj.clone()).unwrap();
        let batch = generator(&world, &mesh, ScanParams::default()).generate(&source);

        assert_eq!(batch.len(), 16);
        for dto in &batch {
            assert_eq!(dto.owner.id(), crate_obj.id);
            assert!(!dto.force_field);
            assert_eq!(dto.location.z, 0.0);
            // next to the crate, never under it
            assert!(dto.location.x.abs() > 100.0 || dto.location.y.abs() > 100.0);
            assert!(dto.location.x.abs() < 200.0 && dto.location.y.abs() < 200.0);
        }
        for (i, a) in batch.iter().enumerate() {
            for b in &batch[i + 1..] {
                assert!(!nearly_equal(a.location, b.location, 37.5));
            }
        }
    }

    #[test]
    fn test_force_field_owner_tags_points() {
        let (world, mesh) = fixture();
        let shield = Arc::new(WorldObject::new(2, "shield", CollisionClass::ForceField));
        world.add_box(shield.clone(), Vec3::new(0.0, 0.0, 100.0), Vec3::splat(100.0));

        let source = CoverSource::from_colliders(&world, shield).unwrap();
        let batch = generator(&world, &mesh, ScanParams::default()).generate(&source);
        assert!(!batch.is_empty());
        assert!(batch.iter().all(|dto| dto.force_field));
    }

    #[test]
    fn test_low_obstacle_gives_no_cover() {
        let (world, mesh) = fixture();
        let curb = Arc::new(WorldObject::new(3, "curb", CollisionClass::Static));
        world.add_box(curb.clone(), Vec3::new(0.0, 0.0, 40.0), Vec3::new(100.0, 100.0, 40.0));

        let source = CoverSource::from_colliders(&world, curb).unwrap();
        assert!(generator(&world, &mesh, ScanParams::default()).generate(&source).is_empty());
    }

    #[test]
    fn test_small_volume_is_skipped() {
        let (world, mesh) = fixture();
        let pebble = Arc::new(WorldObject::new(4, "pebble", CollisionClass::Static));
        world.add_box(pebble.clone(), Vec3::new(0.0, 0.0, 100.0), Vec3::new(20.0, 20.0, 100.0));

        let source = CoverSource::from_colliders(&world, pebble).unwrap();
        assert!(generator(&world, &mesh, ScanParams::default()).generate(&source).is_empty());
    }

    #[test]
    fn test_per_mesh_scan_skips_small_meshes() {
        let (world, mesh) = fixture();
        let bunker = Arc::new(WorldObject::new(5, "bunker", CollisionClass::Static));
        world.add_box(bunker.clone(), Vec3::new(0.0, 0.0, 100.0), Vec3::splat(100.0));
        // antenna is thinner than the grid
        world.add_box(bunker.clone(), Vec3::new(0.0, 0.0, 300.0), Vec3::new(5.0, 5.0, 100.0));

        let source = CoverSource::from_colliders(&world, bunker).unwrap();
        assert_eq!(source.mesh_bounds.len(), 2);

        let per_mesh = ScanParams {
            per_mesh: true,
            ..ScanParams::default()
        };
        let batch = generator(&world, &mesh, per_mesh).generate(&source);
        assert_eq!(batch.len(), 16);
    }

    #[test]
    fn test_unprojectable_candidates_are_dropped() {
        let (world, _) = fixture();
        let empty_mesh = Arc::new(RectNavMesh::new(Vec2::splat(-1000.0), 2000.0, 1, 1));
        let crate_obj = Arc::new(WorldObject::new(1, "crate", CollisionClass::Static));
        world.add_box(crate_obj.clone(), Vec3::new(0.0, 0.0, 100.0), Vec3::splat(100.0));

        let source = CoverSource::from_colliders(&world, crate_obj).unwrap();
        assert!(generator(&world, &empty_mesh, ScanParams::default()).generate(&source).is_empty());
    }
}
