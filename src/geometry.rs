//! Geometric primitives shared by the index, the generators and the queries
//!
//! The world is Z-up: the navigable surface spans X/Y and "above" means +Z.

use glam::{Vec2, Vec3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box, boundary-inclusive
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// Create a box from its corners
    ///
    /// The corners are sorted per axis, so the arguments may be given in any order.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Create a box from a center point and a half-extent
    pub fn from_center_extent(center: Vec3, half_extent: Vec3) -> Self {
        let half_extent = half_extent.abs();
        Self {
            min: center - half_extent,
            max: center + half_extent,
        }
    }

    /// Center point of the box
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Half of the box size on each axis
    #[inline]
    pub fn half_extent(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Full box size on each axis
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check whether a point lies inside the box (boundary-inclusive)
    #[inline]
    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Check whether two boxes overlap (touching counts)
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    /// Grow the box by `amount` on every side of every axis
    pub fn expand_by(&self, amount: Vec3) -> Self {
        Self {
            min: self.min - amount,
            max: self.max + amount,
        }
    }

    /// Grow the box by half of its own size on every axis
    ///
    /// Each side moves out by half the axis length, so the box ends up twice as large.
    pub fn enlarged_by_half(&self) -> Self {
        self.expand_by(self.size() * 0.5)
    }
}

/// Sphere given by center and radius
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    /// Sphere center
    pub center: Vec3,
    /// Sphere radius
    pub radius: f32,
}

impl Sphere {
    /// Create a new sphere
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self {
            center,
            radius: radius.abs(),
        }
    }

    /// Box enclosing the sphere, used to ballpark tree queries
    pub fn bounding_box(&self) -> Aabb {
        Aabb::from_center_extent(self.center, Vec3::splat(self.radius))
    }

    /// Check whether a point lies within the radius (boundary-inclusive)
    #[inline]
    pub fn contains(&self, point: Vec3) -> bool {
        self.center.distance_squared(point) <= self.radius * self.radius
    }
}

/// Region accepted by cover point queries
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryRegion {
    /// Axis-aligned box
    Box(Aabb),
    /// Sphere
    Sphere(Sphere),
}

impl QueryRegion {
    /// Box that encloses the region
    pub fn bounding_box(&self) -> Aabb {
        match self {
            QueryRegion::Box(aabb) => *aabb,
            QueryRegion::Sphere(sphere) => sphere.bounding_box(),
        }
    }

    /// Precise containment test for the region
    pub fn contains(&self, point: Vec3) -> bool {
        match self {
            QueryRegion::Box(aabb) => aabb.contains(point),
            QueryRegion::Sphere(sphere) => sphere.contains(point),
        }
    }
}

impl From<Aabb> for QueryRegion {
    fn from(aabb: Aabb) -> Self {
        QueryRegion::Box(aabb)
    }
}

impl From<Sphere> for QueryRegion {
    fn from(sphere: Sphere) -> Self {
        QueryRegion::Sphere(sphere)
    }
}

/// Horizontal perpendicular of a direction, keeping its vertical component
///
/// Rotates the X/Y part by -90 degrees: `(x, y, z) -> (y, -x, z)`.
#[inline]
pub fn perpendicular(direction: Vec3) -> Vec3 {
    Vec3::new(direction.y, -direction.x, direction.z)
}

/// Rotate the X/Y part of a direction by `degrees` counter-clockwise, keeping Z
pub fn rotate_horizontal(direction: Vec3, degrees: f32) -> Vec3 {
    let rotated = Vec2::from_angle(degrees.to_radians()).rotate(direction.truncate());
    rotated.extend(direction.z)
}

/// Per-axis near-equality of two points
#[inline]
pub fn nearly_equal(a: Vec3, b: Vec3, tolerance: f32) -> bool {
    (a - b).abs().cmple(Vec3::splat(tolerance)).all()
}
