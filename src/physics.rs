//! Physics collaborator
//!
//! Generators and the cover query probe the world through [`PhysicsQuery`].
//! [`ColliderWorld`] implements it on top of parry3d cuboids.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use glam::Vec3;
use log::warn;
use parry3d::math::{Isometry, Point, Vector};
use parry3d::query::{PointQuery, Ray, RayCast};
use parry3d::shape::Cuboid;

use crate::cover_point::{CollisionClass, ObjectId, WorldObject};
use crate::geometry::Aabb;

/// Query channel selecting which objects block a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceChannel {
    /// Solid geometry: static objects and force fields
    Geometry,
    /// Line of sight: static objects and units; force fields are see-through
    Visibility,
    /// Force fields only
    ForceField,
}

impl TraceChannel {
    /// Check whether objects of `class` block this channel
    pub fn blocks(self, class: CollisionClass) -> bool {
        match self {
            TraceChannel::Geometry => matches!(class, CollisionClass::Static | CollisionClass::ForceField),
            TraceChannel::Visibility => matches!(class, CollisionClass::Static | CollisionClass::Unit),
            TraceChannel::ForceField => class == CollisionClass::ForceField,
        }
    }
}

/// First blocking hit of a probe
#[derive(Debug, Clone)]
pub struct TraceHit {
    /// Object that was hit
    pub object: Arc<WorldObject>,
    /// Impact point
    pub location: Vec3,
    /// Distance from the probe start to the impact
    pub distance: f32,
    /// The probe started inside the object
    pub start_penetrating: bool,
}

/// Ray and sphere-sweep queries against world geometry
pub trait PhysicsQuery: Send + Sync {
    /// Cast a ray from `start` to `end`, returning the closest blocking hit
    ///
    /// `ignore` excludes one object, typically the probing unit itself.
    fn raycast(&self, start: Vec3, end: Vec3, channel: TraceChannel, ignore: Option<ObjectId>) -> Option<TraceHit>;

    /// Sweep a sphere of `radius` from `start` to `end`, returning the closest blocking hit
    fn sweep_sphere(
        &self,
        start: Vec3,
        end: Vec3,
        radius: f32,
        channel: TraceChannel,
        ignore: Option<ObjectId>,
    ) -> Option<TraceHit>;
}

#[derive(Debug, Clone)]
struct Collider {
    object: Arc<WorldObject>,
    center: Vec3,
    half_extents: Vec3,
}

impl Collider {
    fn isometry(&self) -> Isometry<f32> {
        Isometry::translation(self.center.x, self.center.y, self.center.z)
    }

    /// Time of impact along a unit direction, or `None` if the probe misses
    fn cast(&self, start: Vec3, direction: Vec3, length: f32, inflate: f32) -> Option<(f32, bool)> {
        let half = self.half_extents + Vec3::splat(inflate);
        let shape = Cuboid::new(Vector::new(half.x, half.y, half.z));
        let isometry = self.isometry();
        let origin = Point::new(start.x, start.y, start.z);

        if shape.contains_point(&isometry, &origin) {
            return Some((0.0, true));
        }
        if length <= f32::EPSILON {
            return None;
        }
        let ray = Ray::new(origin, Vector::new(direction.x, direction.y, direction.z));
        shape
            .cast_ray(&isometry, &ray, length, true)
            .map(|time_of_impact| (time_of_impact, false))
    }
}

/// Collision world made of axis-aligned boxes, each tagged with a world object
///
/// Sphere sweeps are answered against boxes inflated by the sphere radius.
///
/// # Example
///
/// ```
/// use cover_points::*;
/// use glam::Vec3;
/// use std::sync::Arc;
///
/// let world = ColliderWorld::new();
/// let wall = Arc::new(WorldObject::new(1, "wall", CollisionClass::Static));
/// world.add_box(wall, Vec3::new(100.0, 0.0, 50.0), Vec3::new(10.0, 100.0, 50.0));
///
/// let hit = world
///     .raycast(Vec3::new(0.0, 0.0, 50.0), Vec3::new(200.0, 0.0, 50.0), TraceChannel::Geometry, None)
///     .unwrap();
/// assert_eq!(hit.object.id, ObjectId(1));
/// assert!((hit.distance - 90.0).abs() < 1e-3);
/// ```
#[derive(Debug, Default)]
pub struct ColliderWorld {
    colliders: RwLock<Vec<Collider>>,
}

impl ColliderWorld {
    /// Create an empty world
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a box collider for `object`
    ///
    /// An object may own several boxes.
    pub fn add_box(&self, object: Arc<WorldObject>, center: Vec3, half_extents: Vec3) {
        self.write().push(Collider {
            object,
            center,
            half_extents: half_extents.abs(),
        });
    }

    /// Remove every collider of an object, returning how many were removed
    ///
    /// The world holds strong references, so this is part of destroying an object.
    pub fn remove_object(&self, id: ObjectId) -> usize {
        let mut colliders = self.write();
        let before = colliders.len();
        colliders.retain(|collider| collider.object.id != id);
        before - colliders.len()
    }

    /// Box around every collider of an object
    pub fn bounds_of(&self, id: ObjectId) -> Option<Aabb> {
        self.boxes_of(id).into_iter().reduce(|a, b| Aabb {
            min: a.min.min(b.min),
            max: a.max.max(b.max),
        })
    }

    /// One box per collider of an object
    pub fn boxes_of(&self, id: ObjectId) -> Vec<Aabb> {
        self.read()
            .iter()
            .filter(|collider| collider.object.id == id)
            .map(|collider| Aabb::from_center_extent(collider.center, collider.half_extents))
            .collect()
    }

    /// Number of colliders
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if the world has no colliders
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Collider>> {
        self.colliders.read().unwrap_or_else(|poisoned| {
            warn!("collider world lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Collider>> {
        self.colliders.write().unwrap_or_else(|poisoned| {
            warn!("collider world lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn trace(
        &self,
        start: Vec3,
        end: Vec3,
        inflate: f32,
        channel: TraceChannel,
        ignore: Option<ObjectId>,
    ) -> Option<TraceHit> {
        let delta = end - start;
        let length = delta.length();
        let direction = delta.normalize_or_zero();

        let colliders = self.read();
        colliders
            .iter()
            .filter(|collider| channel.blocks(collider.object.class))
            .filter(|collider| Some(collider.object.id) != ignore)
            .filter_map(|collider| {
                collider
                    .cast(start, direction, length, inflate)
                    .map(|(distance, start_penetrating)| (collider, distance, start_penetrating))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(collider, distance, start_penetrating)| TraceHit {
                object: Arc::clone(&collider.object),
                location: start + direction * distance,
                distance,
                start_penetrating,
            })
    }
}

impl PhysicsQuery for ColliderWorld {
    fn raycast(&self, start: Vec3, end: Vec3, channel: TraceChannel, ignore: Option<ObjectId>) -> Option<TraceHit> {
        self.trace(start, end, 0.0, channel, ignore)
    }

    fn sweep_sphere(
        &self,
        start: Vec3,
        end: Vec3,
        radius: f32,
        channel: TraceChannel,
        ignore: Option<ObjectId>,
    ) -> Option<TraceHit> {
        self.trace(start, end, radius.max(0.0), channel, ignore)
    }
}
