//! Cover System Configuration and Builder
//!
//! This module provides the configuration types for the cover store, the two
//! generators and the cover query.

use std::time::Duration;

use glam::Vec3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{CoverError, Result};
use crate::geometry::Aabb;

/// Half-extent of the default world volume
pub const DEFAULT_WORLD_EXTENT: f32 = 64_000.0;

/// Share of the cover point spacing used as dedup radius
pub const DEFAULT_DEDUP_FACTOR: f32 = 0.9;

/// System-wide configuration of the cover store and navmesh generation
///
/// # Example
///
/// ```rust
/// use cover_points::*;
///
/// let config = CoverConfigBuilder::new()
///     .cover_point_min_distance(80.0)
///     .unwrap()
///     .ground_offset(12.0)
///     .unwrap()
///     .build()
///     .unwrap();
///
/// assert_eq!(config.dedup_radius(), 72.0);
/// ```
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverConfig {
    /// Root volume of the spatial index
    pub world_bounds: Aabb,

    /// Navmesh cover points outside this box are never generated
    ///
    /// Used to filter out the edges of the map.
    pub map_bounds: Aabb,

    /// Distance between two navmesh edge-walk steps
    pub cover_point_min_distance: f32,

    /// Fraction of `cover_point_min_distance` used as the dedup radius
    pub dedup_factor: f32,

    /// Height of the smallest agent that will ever fit under overhanging cover
    ///
    /// Should normally be the crouched height of the smallest unit.
    pub smallest_agent_height: f32,

    /// Vertical offset added to every navmesh cover point
    ///
    /// Keeps small irregularities of the navmesh from registering as cover.
    pub ground_offset: f32,

    /// Projection extent used when revalidating resident points
    pub stale_tolerance: Vec3,

    /// Size of the generation worker pool (0 lets rayon decide)
    pub worker_threads: usize,
}

impl CoverConfig {
    /// Minimum distance between any two resident cover points
    #[inline]
    pub fn dedup_radius(&self) -> f32 {
        self.cover_point_min_distance * self.dedup_factor
    }
}

impl Default for CoverConfig {
    fn default() -> Self {
        CoverConfigBuilder::new().assemble()
    }
}

/// Builder for creating [`CoverConfig`] with validation
#[derive(Debug, Clone)]
pub struct CoverConfigBuilder {
    world_bounds: Aabb,
    map_bounds: Option<Aabb>,
    cover_point_min_distance: f32,
    dedup_factor: f32,
    smallest_agent_height: f32,
    ground_offset: f32,
    stale_tolerance: Option<Vec3>,
    worker_threads: usize,
}

impl CoverConfigBuilder {
    /// Create a new builder with default values
    ///
    /// Defaults:
    /// - world_bounds: centered at the origin, half-extent 64 000
    /// - map_bounds: same as world_bounds
    /// - cover_point_min_distance: 60
    /// - dedup_factor: 0.9
    /// - smallest_agent_height: 140
    /// - ground_offset: 10
    /// - stale_tolerance: (0.1, 0.1, ground_offset)
    /// - worker_threads: 0
    pub fn new() -> Self {
        Self {
            world_bounds: Aabb::from_center_extent(Vec3::ZERO, Vec3::splat(DEFAULT_WORLD_EXTENT)),
            map_bounds: None,
            cover_point_min_distance: 60.0,
            dedup_factor: DEFAULT_DEDUP_FACTOR,
            smallest_agent_height: 140.0,
            ground_offset: 10.0,
            stale_tolerance: None,
            worker_threads: 0,
        }
    }

    /// Set the root volume of the spatial index
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the box is flat on any axis
    pub fn world_bounds(mut self, bounds: Aabb) -> Result<Self> {
        if !bounds.size().cmpgt(Vec3::ZERO).all() {
            return Err(CoverError::InvalidConfig(format!(
                "World bounds must have a positive size on every axis (got {:?})",
                bounds.size()
            )));
        }
        self.world_bounds = bounds;
        Ok(self)
    }

    /// Set the map filter used by the navmesh edge walker
    pub fn map_bounds(mut self, bounds: Aabb) -> Self {
        self.map_bounds = Some(bounds);
        self
    }

    /// Set the spacing of navmesh cover points
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if distance <= 0.0
    pub fn cover_point_min_distance(mut self, distance: f32) -> Result<Self> {
        if distance <= 0.0 {
            return Err(CoverError::InvalidConfig(format!(
                "Cover point min distance must be positive (got {})",
                distance
            )));
        }
        self.cover_point_min_distance = distance;
        Ok(self)
    }

    /// Set the dedup radius as a fraction of the cover point spacing
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if factor is outside `0.0..=1.0`
    pub fn dedup_factor(mut self, factor: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&factor) {
            return Err(CoverError::InvalidConfig(format!(
                "Dedup factor must be within 0..=1 (got {})",
                factor
            )));
        }
        self.dedup_factor = factor;
        Ok(self)
    }

    /// Set the height of the smallest agent
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if height <= 0.0
    pub fn smallest_agent_height(mut self, height: f32) -> Result<Self> {
        if height <= 0.0 {
            return Err(CoverError::InvalidConfig(format!(
                "Smallest agent height must be positive (got {})",
                height
            )));
        }
        self.smallest_agent_height = height;
        Ok(self)
    }

    /// Set the vertical offset of navmesh cover points
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if offset is negative
    pub fn ground_offset(mut self, offset: f32) -> Result<Self> {
        if offset < 0.0 {
            return Err(CoverError::InvalidConfig(format!(
                "Ground offset must be >= 0 (got {})",
                offset
            )));
        }
        self.ground_offset = offset;
        Ok(self)
    }

    /// Override the projection extent used to revalidate resident points
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if any component is negative
    pub fn stale_tolerance(mut self, tolerance: Vec3) -> Result<Self> {
        if tolerance.min_element() < 0.0 {
            return Err(CoverError::InvalidConfig(format!(
                "Stale tolerance must be non-negative (got {:?})",
                tolerance
            )));
        }
        self.stale_tolerance = Some(tolerance);
        Ok(self)
    }

    /// Set the number of generation worker threads (0 lets rayon decide)
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the smallest agent height does not clear the ground offset
    pub fn build(self) -> Result<CoverConfig> {
        if self.smallest_agent_height <= self.ground_offset {
            return Err(CoverError::InvalidConfig(format!(
                "Smallest agent height ({}) must exceed the ground offset ({})",
                self.smallest_agent_height, self.ground_offset
            )));
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> CoverConfig {
        CoverConfig {
            world_bounds: self.world_bounds,
            map_bounds: self.map_bounds.unwrap_or(self.world_bounds),
            cover_point_min_distance: self.cover_point_min_distance,
            dedup_factor: self.dedup_factor,
            smallest_agent_height: self.smallest_agent_height,
            ground_offset: self.ground_offset,
            stale_tolerance: self
                .stale_tolerance
                .unwrap_or(Vec3::new(0.1, 0.1, self.ground_offset)),
            worker_threads: self.worker_threads,
        }
    }
}

impl Default for CoverConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters of the bounding-volume grid scan
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanParams {
    /// Grid spacing `g`
    pub grid_unit: f32,
    /// Volumes grow by `grid_unit * bounds_expansion` before scanning
    pub bounds_expansion: f32,
    /// Top of the vertical classification probe
    pub smallest_agent_height: f32,
    /// Bottom of the vertical classification probe
    pub min_passable_height: f32,
    /// Scan each sub-mesh volume separately instead of the whole object
    pub per_mesh: bool,
}

impl ScanParams {
    /// Parameters for a given grid spacing and agent height
    ///
    /// The minimum passable height is half of the agent height.
    pub fn new(grid_unit: f32, smallest_agent_height: f32) -> Self {
        Self {
            grid_unit,
            bounds_expansion: 0.5,
            smallest_agent_height,
            min_passable_height: smallest_agent_height * 0.5,
            per_mesh: false,
        }
    }

    /// Check that the parameters describe a usable scan
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the grid is not positive or the probe range is empty
    pub fn validate(&self) -> Result<()> {
        if self.grid_unit <= 0.0 {
            return Err(CoverError::InvalidConfig(format!(
                "Scan grid unit must be positive (got {})",
                self.grid_unit
            )));
        }
        if self.bounds_expansion < 0.0 {
            return Err(CoverError::InvalidConfig(format!(
                "Bounds expansion must be >= 0 (got {})",
                self.bounds_expansion
            )));
        }
        if self.min_passable_height < 0.0 || self.min_passable_height >= self.smallest_agent_height {
            return Err(CoverError::InvalidConfig(format!(
                "Min passable height must be within 0..{} (got {})",
                self.smallest_agent_height, self.min_passable_height
            )));
        }
        Ok(())
    }
}

impl Default for ScanParams {
    fn default() -> Self {
        Self::new(75.0, 190.0)
    }
}

/// Parameters of the navmesh boundary edge walk
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeWalkParams {
    /// Distance between two steps along an edge
    pub cover_spacing: f32,
    /// Height of the blocking-geometry probe
    pub smallest_agent_height: f32,
    /// Vertical offset added to every step point
    pub ground_offset: f32,
    /// Steps outside this box are skipped
    pub map_bounds: Aabb,
    /// Reach of the horizontal physics probe into a navmesh hole
    ///
    /// Longer than the hole check so it reaches slanted geometry such as ramps.
    pub scan_reach: f32,
    /// Distance between the outermost navmesh edge and a cliff
    pub cliff_edge_distance: f32,
    /// Horizontal offset of the slanted cliff probe
    ///
    /// Catches cliff walls that are not perfectly vertical.
    pub straight_cliff_tolerance: f32,
    /// Length of the navmesh probe that checks for a hole next to an edge
    pub hole_check_reach: f32,
    /// Depth of the trace that finds the ground object behind a ledge
    pub ground_probe_depth: f32,
}

impl EdgeWalkParams {
    /// Derive edge walk parameters from the system configuration
    pub fn from_config(config: &CoverConfig) -> Self {
        Self {
            cover_spacing: config.cover_point_min_distance,
            smallest_agent_height: config.smallest_agent_height,
            ground_offset: config.ground_offset,
            map_bounds: config.map_bounds,
            scan_reach: 100.0,
            cliff_edge_distance: 70.0,
            straight_cliff_tolerance: 100.0,
            hole_check_reach: 5.0,
            ground_probe_depth: config.ground_offset * 3.0,
        }
    }
}

impl Default for EdgeWalkParams {
    fn default() -> Self {
        Self::from_config(&CoverConfig::default())
    }
}

/// Parameters of a cover query
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverQueryParams {
    /// Candidates strictly closer to the target than this are discarded
    pub min_range: f32,
    /// Attack range; the candidate box has half-extent `max_range / 2`
    pub max_range: f32,
    /// Sideways offset of the eye when leaning out of cover
    pub lean_offset: f32,
    /// Cover object must be at most this far from the eye
    pub max_object_hit_distance: f32,
    /// Radius of the line-of-sight sweeps
    pub probe_radius: f32,
}

impl CoverQueryParams {
    /// Check that the range window is well formed
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `min_range > max_range`, the lean offset is
    /// not positive or any other value is negative
    pub fn validate(&self) -> Result<()> {
        if !(self.min_range >= 0.0 && self.max_range >= self.min_range) {
            return Err(CoverError::InvalidConfig(format!(
                "Range window must satisfy 0 <= min <= max (got {}..{})",
                self.min_range, self.max_range
            )));
        }
        if !(self.lean_offset > 0.0) {
            return Err(CoverError::InvalidConfig(format!(
                "Lean offset must be > 0 (got {})",
                self.lean_offset
            )));
        }
        if !(self.max_object_hit_distance >= 0.0 && self.probe_radius >= 0.0) {
            return Err(CoverError::InvalidConfig(
                "Max object hit distance and probe radius must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CoverQueryParams {
    fn default() -> Self {
        Self {
            min_range: 100.0,
            max_range: 1000.0,
            lean_offset: 100.0,
            max_object_hit_distance: 310.0,
            probe_radius: 5.0,
        }
    }
}

/// Cadence of the buffered tile-update broadcast
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileChannelConfig {
    /// Delay between two interval flushes
    pub interval: Duration,
}

impl Default for TileChannelConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
        }
    }
}
