//! Runtime tactical cover points for AI units
//!
//! Generates cover points from world geometry and navigation data, keeps them
//! in a concurrent octree with a minimum spacing, and answers "where should
//! this unit take cover from that threat" with an exclusive reservation.
//!
//! # Quick Start
//!
//! ```rust
//! use cover_points::*;
//! use std::sync::Arc;
//!
//! let config = CoverConfigBuilder::new()
//!     .cover_point_min_distance(60.0).unwrap()
//!     .build().unwrap();
//! let store = CoverStore::from_config(&config);
//!
//! let wall = Arc::new(WorldObject::new(1, "wall", CollisionClass::Static));
//! let accepted = store.add_points(vec![
//!     CoverPointDto::new(&wall, Vec3::new(0.0, 0.0, 10.0), false),
//!     // closer than the dedup radius of 54
//!     CoverPointDto::new(&wall, Vec3::new(20.0, 0.0, 10.0), false),
//!     CoverPointDto::new(&wall, Vec3::new(200.0, 0.0, 10.0), false),
//! ]);
//! assert_eq!(accepted, 2);
//!
//! assert!(store.hold(Vec3::new(0.0, 0.0, 10.0)));
//! assert!(!store.hold(Vec3::new(0.0, 0.0, 10.0)));
//!
//! let near = store.find_points(&Aabb::from_center_extent(Vec3::ZERO, Vec3::splat(100.0)).into());
//! assert_eq!(near.len(), 1);
//! assert!(near[0].taken);
//! ```
//!
//! # Features
//!
//! - `spatial-index` (default): KD-tree neighbor lookups during bounding-volume scans
//! - `serde`: Enables serialization support for configuration and value types

// Modules
pub mod error;
pub mod config;
pub mod geometry;
pub mod cover_point;
pub mod octree;
pub mod store;
pub mod navigation;
pub mod physics;
pub mod generation;
pub mod reaper;
pub mod query;
pub mod tile_updates;
pub mod system;

// Re-export core types for convenience
pub use error::{CoverError, Result};
pub use config::{
    CoverConfig, CoverConfigBuilder, CoverQueryParams, EdgeWalkParams, ScanParams, TileChannelConfig,
};
pub use geometry::{Aabb, QueryRegion, Sphere};
pub use cover_point::{CollisionClass, CoverPoint, CoverPointDto, ObjectId, OwnerRef, WorldObject};
pub use octree::{CoverIndex, CoverPointHandle};
pub use store::{CoverStore, Lifecycle};
pub use navigation::{dirty_tiles, AgentProfile, NavRect, NavigationQuery, RectId, RectNavMesh, TileId};
pub use physics::{ColliderWorld, PhysicsQuery, TraceChannel, TraceHit};
pub use generation::{ActorBoundsGenerator, CoverSource, NavMeshEdgeWalker, TileCover};
pub use reaper::StaleCoverReaper;
pub use query::{
    CoverEvent, CoverEventSink, CoverQueryEvaluator, CoverTarget, NullSink, RejectReason, Requester, Stance,
};
pub use tile_updates::{Cadence, IntervalTimer, TileListener, TileSet, TileUpdateChannel};
pub use system::CoverSystem;

// Re-export glam::Vec3 for convenience
pub use glam::Vec3;
