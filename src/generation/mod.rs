//! Cover point generation
//!
//! Two independent producers feed the store:
//!
//! - [`ActorBoundsGenerator`] scans a grid over one object's bounding volume
//!   and keeps walkable spots right next to blocked space.
//! - [`NavMeshEdgeWalker`] steps along the boundary edges of rebuilt navmesh
//!   tiles and keeps spots where geometry or a ledge lies beyond the edge.
//!
//! Both only read the world; inserting the batches is up to the caller.

mod actor_bounds;
mod edge_walker;
mod free_cells;

pub use actor_bounds::{ActorBoundsGenerator, CoverSource};
pub use edge_walker::{NavMeshEdgeWalker, TileCover};
