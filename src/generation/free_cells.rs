//! Lookup of free grid points during the bounding-volume scan
//!
//! With the `spatial-index` feature the free points go into a KD-tree, so
//! the neighbor scan around each blocked point stays logarithmic. Without it
//! a linear scan gives identical results.

#[cfg(feature = "spatial-index")]
use kiddo::immutable::float::kdtree::ImmutableKdTree;
#[cfg(feature = "spatial-index")]
use kiddo::SquaredEuclidean;

use glam::Vec3;

use crate::geometry::nearly_equal;

/// Free grid points of one scan
///
/// # Performance
///
/// - Construction: O(n log n) with the KD-tree, O(1) without
/// - Query: O(log n + k) with the KD-tree, O(n) without
pub(crate) struct FreeCells {
    points: Vec<Vec3>,
    #[cfg(feature = "spatial-index")]
    tree: Option<ImmutableKdTree<f32, usize, 3, 32>>,
}

impl FreeCells {
    /// Index the free points of a scan
    pub(crate) fn new(points: Vec<Vec3>) -> Self {
        #[cfg(feature = "spatial-index")]
        {
            let tree = if points.is_empty() {
                None
            } else {
                let coordinates: Vec<[f32; 3]> = points.iter().map(|p| [p.x, p.y, p.z]).collect();
                Some(ImmutableKdTree::new_from_slice(&coordinates))
            };
            Self { points, tree }
        }

        #[cfg(not(feature = "spatial-index"))]
        {
            Self { points }
        }
    }

    /// Number of free points
    pub(crate) fn len(&self) -> usize {
        self.points.len()
    }

    /// Free points within `tolerance` of `position` on every axis, in scan order
    pub(crate) fn near(&self, position: Vec3, tolerance: f32) -> Vec<Vec3> {
        let mut indices = self.candidates(position, tolerance);
        indices.sort_unstable();
        indices
            .into_iter()
            .map(|i| self.points[i])
            .filter(|p| nearly_equal(*p, position, tolerance))
            .collect()
    }

    #[cfg(feature = "spatial-index")]
    fn candidates(&self, position: Vec3, tolerance: f32) -> Vec<usize> {
        let Some(tree) = &self.tree else {
            return Vec::new();
        };
        // the sphere around the tolerance cube
        let radius_squared = 3.0 * tolerance * tolerance;
        tree.within_unsorted::<SquaredEuclidean>(&[position.x, position.y, position.z], radius_squared)
            .into_iter()
            .map(|neighbour| neighbour.item as usize)
            .collect()
    }

    #[cfg(not(feature = "spatial-index"))]
    fn candidates(&self, _position: Vec3, _tolerance: f32) -> Vec<usize> {
        (0..self.points.len()).collect()
    }
}
