//! Cover point data model
//!
//! Cover points are generated from world objects. A point remembers the object
//! that produced it through a weak reference, so the index never keeps a
//! destroyed object alive and a dead owner simply reads back as absent.

use std::fmt;
use std::sync::{Arc, Weak};

use glam::Vec3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stable identity of a world object
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an object responds to collision queries
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CollisionClass {
    /// Ordinary solid geometry: blocks units and projectiles
    #[default]
    Static,
    /// Force field: units pass through, projectiles are blocked
    ForceField,
    /// A mobile unit; never counts as cover
    Unit,
}

/// An object living in the world: walls, crates, shields, units
///
/// The host owns world objects through `Arc`. Dropping the last `Arc`
/// destroys the object, which turns every cover point it generated stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldObject {
    /// Unique identity
    pub id: ObjectId,
    /// Human-readable name used in logs
    pub label: String,
    /// Collision classification
    pub class: CollisionClass,
}

impl WorldObject {
    /// Create a new world object
    pub fn new(id: u64, label: impl Into<String>, class: CollisionClass) -> Self {
        Self {
            id: ObjectId(id),
            label: label.into(),
            class,
        }
    }

    /// Check whether the object is a force field
    #[inline]
    pub fn is_force_field(&self) -> bool {
        self.class == CollisionClass::ForceField
    }

    /// Check whether the object is a mobile unit
    #[inline]
    pub fn is_unit(&self) -> bool {
        self.class == CollisionClass::Unit
    }
}

/// Weak back-reference from a cover point to the object that generated it
///
/// Only used for lookup; it never extends the owner's lifetime.
#[derive(Debug, Clone)]
pub struct OwnerRef {
    id: ObjectId,
    handle: Weak<WorldObject>,
}

impl OwnerRef {
    /// Reference a live object
    pub fn new(owner: &Arc<WorldObject>) -> Self {
        Self {
            id: owner.id,
            handle: Arc::downgrade(owner),
        }
    }

    /// Identity of the owner, available even after it was destroyed
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The owner, if it is still alive
    pub fn get(&self) -> Option<Arc<WorldObject>> {
        self.handle.upgrade()
    }

    /// Check whether the owner is still alive
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.handle.strong_count() > 0
    }
}

impl PartialEq for OwnerRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// A generated cover point as produced by a generator batch
///
/// Batches of these are handed to the store, which assigns the points their
/// place in the spatial index.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverPointDto {
    /// Object the point was generated from
    pub owner: OwnerRef,
    /// Position of the point
    pub location: Vec3,
    /// Whether the cover is a force field
    pub force_field: bool,
}

impl CoverPointDto {
    /// Create a new DTO
    pub fn new(owner: &Arc<WorldObject>, location: Vec3, force_field: bool) -> Self {
        Self {
            owner: OwnerRef::new(owner),
            location,
            force_field,
        }
    }
}

/// A resident cover point
///
/// The geometry fields never change after insertion; only `taken` flips,
/// and only through the store's hold/release protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverPoint {
    /// Position of the point
    pub location: Vec3,
    /// `true` if units can pass through the cover but projectiles cannot
    pub force_field: bool,
    /// Object that generated this point
    pub owner: OwnerRef,
    /// Whether a unit currently holds this point
    pub taken: bool,
}

impl CoverPoint {
    /// Create an untaken point
    pub fn new(location: Vec3, force_field: bool, owner: OwnerRef) -> Self {
        Self {
            location,
            force_field,
            owner,
            taken: false,
        }
    }
}

impl From<CoverPointDto> for CoverPoint {
    fn from(dto: CoverPointDto) -> Self {
        CoverPoint::new(dto.location, dto.force_field, dto.owner)
    }
}
