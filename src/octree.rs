//! Arena-backed octree of cover points
//!
//! Points live in a slot arena; handles are slot indices tagged with a
//! generation counter, so a slot reused after a removal can never be mistaken
//! for the point that used to live there. Tree nodes live in a second arena
//! and only reference slot indices.
//!
//! The index does no locking of its own. [`crate::store::CoverStore`] is the
//! thread-safe entry point.

use glam::Vec3;

use crate::cover_point::CoverPoint;
use crate::geometry::{Aabb, QueryRegion, Sphere};

/// Leaf size that triggers a split
const MAX_ELEMENTS_PER_LEAF: usize = 16;

/// Subtrees holding this many points or fewer are collapsed by [`CoverIndex::compact`]
const MIN_INCLUSIVE_ELEMENTS_PER_NODE: usize = 7;

/// Nodes at this depth never split
const MAX_NODE_DEPTH: u8 = 12;

const ROOT: usize = 0;

/// Stable reference to a resident cover point
///
/// Becomes permanently invalid once the point is removed. Every operation
/// taking a handle treats an invalid one as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoverPointHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone)]
struct Entry {
    point: CoverPoint,
    node: usize,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug, Clone)]
struct Node {
    bounds: Aabb,
    parent: Option<usize>,
    children: Option<[usize; 8]>,
    elements: Vec<u32>,
    depth: u8,
    /// Points stored in this node and all of its descendants
    subtree_len: usize,
}

impl Node {
    fn new(bounds: Aabb, parent: Option<usize>, depth: u8) -> Self {
        Self {
            bounds,
            parent,
            children: None,
            elements: Vec::new(),
            depth,
            subtree_len: 0,
        }
    }
}

/// Bounded spatial container of cover points
///
/// Points outside the root bounds are still accepted; they are kept on the
/// root node and found by every query whose region contains them.
#[derive(Debug, Clone)]
pub struct CoverIndex {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    nodes: Vec<Option<Node>>,
    free_nodes: Vec<usize>,
    len: usize,
}

impl CoverIndex {
    /// Create an empty index covering `bounds`
    pub fn new(bounds: Aabb) -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            nodes: vec![Some(Node::new(bounds, None, 0))],
            free_nodes: Vec::new(),
            len: 0,
        }
    }

    /// Root bounds of the index
    pub fn bounds(&self) -> Aabb {
        self.node(ROOT).bounds
    }

    /// Number of resident points
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the index holds no points
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a point unless another resident point lies closer than `dedup_radius`
    ///
    /// Returns the new point's handle, or `None` when the insert was rejected.
    pub fn insert(&mut self, point: CoverPoint, dedup_radius: f32) -> Option<CoverPointHandle> {
        if self.any_within(point.location, dedup_radius) {
            return None;
        }

        let location = point.location;
        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let node = self.place(index, location);
        let slot = &mut self.slots[index as usize];
        slot.entry = Some(Entry { point, node });
        self.len += 1;

        // splitting needs the entry in place to redistribute it
        self.split_if_needed(node);

        Some(CoverPointHandle {
            index,
            generation: slot_generation(&self.slots, index),
        })
    }

    /// Check whether any resident point lies strictly closer than `radius` to `location`
    pub fn any_within(&self, location: Vec3, radius: f32) -> bool {
        if radius <= 0.0 {
            return false;
        }
        let radius_squared = radius * radius;
        let ballpark = Aabb::from_center_extent(location, Vec3::splat(radius));
        let mut found = false;
        self.visit(&ballpark, |point| {
            if point.location.distance_squared(location) < radius_squared {
                found = true;
            }
            !found
        });
        found
    }

    /// All resident points inside the box (boundary-inclusive)
    pub fn query_box(&self, aabb: &Aabb) -> Vec<CoverPoint> {
        let mut result = Vec::new();
        self.visit(aabb, |point| {
            if aabb.contains(point.location) {
                result.push(point.clone());
            }
            true
        });
        result
    }

    /// All resident points within the sphere's radius
    ///
    /// Ballparks with the enclosing box first, then checks the exact distance.
    pub fn query_sphere(&self, sphere: &Sphere) -> Vec<CoverPoint> {
        let mut result = Vec::new();
        self.visit(&sphere.bounding_box(), |point| {
            if sphere.contains(point.location) {
                result.push(point.clone());
            }
            true
        });
        result
    }

    /// Query either a box or a sphere
    pub fn query(&self, region: &QueryRegion) -> Vec<CoverPoint> {
        match region {
            QueryRegion::Box(aabb) => self.query_box(aabb),
            QueryRegion::Sphere(sphere) => self.query_sphere(sphere),
        }
    }

    /// Handles of all resident points inside the box
    pub fn handles_in(&self, aabb: &Aabb) -> Vec<CoverPointHandle> {
        let mut result = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(node_id) = stack.pop() {
            let node = self.node(node_id);
            for &index in &node.elements {
                if let Some(entry) = &self.slots[index as usize].entry {
                    if aabb.contains(entry.point.location) {
                        result.push(CoverPointHandle {
                            index,
                            generation: self.slots[index as usize].generation,
                        });
                    }
                }
            }
            self.push_overlapping_children(node, aabb, &mut stack);
        }
        result
    }

    /// The point behind a handle, if it is still resident
    pub fn get(&self, handle: CoverPointHandle) -> Option<&CoverPoint> {
        self.entry(handle).map(|entry| &entry.point)
    }

    /// Check whether a handle still refers to a resident point
    #[inline]
    pub fn contains(&self, handle: CoverPointHandle) -> bool {
        self.entry(handle).is_some()
    }

    /// Remove a point; returns it if the handle was valid
    pub fn remove(&mut self, handle: CoverPointHandle) -> Option<CoverPoint> {
        self.entry(handle)?;

        let slot = &mut self.slots[handle.index as usize];
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(handle.index);
        self.len -= 1;

        let node = self.node_mut(entry.node);
        if let Some(position) = node.elements.iter().position(|&i| i == handle.index) {
            node.elements.swap_remove(position);
        }

        let mut current = Some(entry.node);
        while let Some(node_id) = current {
            let node = self.node_mut(node_id);
            node.subtree_len = node.subtree_len.saturating_sub(1);
            current = node.parent;
        }

        Some(entry.point)
    }

    /// Mark a point as taken
    ///
    /// Succeeds only if the point exists and is currently untaken.
    pub fn hold(&mut self, handle: CoverPointHandle) -> bool {
        match self.point_mut(handle) {
            Some(point) if !point.taken => {
                point.taken = true;
                true
            }
            _ => false,
        }
    }

    /// Mark a point as free again
    ///
    /// Succeeds only if the point exists and is currently taken.
    pub fn release(&mut self, handle: CoverPointHandle) -> bool {
        match self.point_mut(handle) {
            Some(point) if point.taken => {
                point.taken = false;
                true
            }
            _ => false,
        }
    }

    /// Iterate over every resident point
    pub fn iter(&self) -> impl Iterator<Item = (CoverPointHandle, &CoverPoint)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry.as_ref().map(|entry| {
                (
                    CoverPointHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    &entry.point,
                )
            })
        })
    }

    /// Remove every point, invalidating all handles
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free_slots.push(index as u32);
            }
        }
        let bounds = self.bounds();
        self.nodes = vec![Some(Node::new(bounds, None, 0))];
        self.free_nodes.clear();
        self.len = 0;
    }

    /// Reclaim memory after bulk removals
    ///
    /// Collapses sparse subtrees back into their parents and trims the node
    /// arena. Has no effect on query results or on handle validity.
    pub fn compact(&mut self) {
        self.collapse(ROOT);

        while matches!(self.nodes.last(), Some(None)) {
            self.nodes.pop();
        }
        let live_nodes = self.nodes.len();
        self.free_nodes.retain(|&id| id < live_nodes);

        for node in self.nodes.iter_mut().flatten() {
            node.elements.shrink_to_fit();
        }
        self.slots.shrink_to_fit();
        self.free_slots.shrink_to_fit();
    }

    fn entry(&self, handle: CoverPointHandle) -> Option<&Entry> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn point_mut(&mut self, handle: CoverPointHandle) -> Option<&mut CoverPoint> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_mut().map(|entry| &mut entry.point)
    }

    fn node(&self, id: usize) -> &Node {
        match &self.nodes[id] {
            Some(node) => node,
            None => unreachable!("node {id} referenced after being freed"),
        }
    }

    fn node_mut(&mut self, id: usize) -> &mut Node {
        match &mut self.nodes[id] {
            Some(node) => node,
            None => unreachable!("node {id} referenced after being freed"),
        }
    }

    /// Visit points of every node overlapping `region` until `visitor` returns false
    fn visit<F>(&self, region: &Aabb, mut visitor: F)
    where
        F: FnMut(&CoverPoint) -> bool,
    {
        let mut stack = vec![ROOT];
        while let Some(node_id) = stack.pop() {
            let node = self.node(node_id);
            for &index in &node.elements {
                if let Some(entry) = &self.slots[index as usize].entry {
                    if !visitor(&entry.point) {
                        return;
                    }
                }
            }
            self.push_overlapping_children(node, region, &mut stack);
        }
    }

    fn push_overlapping_children(&self, node: &Node, region: &Aabb, stack: &mut Vec<usize>) {
        if let Some(children) = node.children {
            for child in children {
                if self.node(child).bounds.intersects(region) {
                    stack.push(child);
                }
            }
        }
    }

    /// Walk down to the node that receives `location` and record the slot there
    fn place(&mut self, index: u32, location: Vec3) -> usize {
        let mut node_id = ROOT;
        if !self.node(ROOT).bounds.contains(location) {
            let root = self.node_mut(ROOT);
            root.subtree_len += 1;
            root.elements.push(index);
            return ROOT;
        }

        loop {
            let node = self.node_mut(node_id);
            node.subtree_len += 1;
            match node.children {
                Some(children) => {
                    node_id = children[octant(&node.bounds, location)];
                }
                None => {
                    node.elements.push(index);
                    return node_id;
                }
            }
        }
    }

    fn split_if_needed(&mut self, node_id: usize) {
        let node = self.node(node_id);
        if node.children.is_some()
            || node.elements.len() <= MAX_ELEMENTS_PER_LEAF
            || node.depth >= MAX_NODE_DEPTH
        {
            return;
        }

        let bounds = node.bounds;
        let depth = node.depth + 1;
        let mut children = [0usize; 8];
        for (octant_index, child) in children.iter_mut().enumerate() {
            *child = self.alloc_node(Node::new(
                octant_bounds(&bounds, octant_index),
                Some(node_id),
                depth,
            ));
        }

        // keep out-of-bounds overflow on the root
        let elements = std::mem::take(&mut self.node_mut(node_id).elements);
        let mut kept = Vec::new();
        for index in elements {
            let location = match &self.slots[index as usize].entry {
                Some(entry) => entry.point.location,
                None => continue,
            };
            if !bounds.contains(location) {
                kept.push(index);
                continue;
            }
            let child_id = children[octant(&bounds, location)];
            let child = self.node_mut(child_id);
            child.elements.push(index);
            child.subtree_len += 1;
            if let Some(entry) = &mut self.slots[index as usize].entry {
                entry.node = child_id;
            }
        }

        let node = self.node_mut(node_id);
        node.elements = kept;
        node.children = Some(children);

        for child in children {
            self.split_if_needed(child);
        }
    }

    fn alloc_node(&mut self, node: Node) -> usize {
        match self.free_nodes.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn collapse(&mut self, node_id: usize) {
        let Some(children) = self.node(node_id).children else {
            return;
        };

        if self.node(node_id).subtree_len > MIN_INCLUSIVE_ELEMENTS_PER_NODE {
            for child in children {
                self.collapse(child);
            }
            return;
        }

        let mut gathered = Vec::new();
        let mut stack = children.to_vec();
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes[id].take() {
                gathered.extend(node.elements);
                if let Some(grandchildren) = node.children {
                    stack.extend(grandchildren);
                }
                self.free_nodes.push(id);
            }
        }

        for &index in &gathered {
            if let Some(entry) = &mut self.slots[index as usize].entry {
                entry.node = node_id;
            }
        }

        let node = self.node_mut(node_id);
        node.elements.extend(gathered);
        node.children = None;
    }
}

fn slot_generation(slots: &[Slot], index: u32) -> u32 {
    slots[index as usize].generation
}

/// Child octant of `bounds` that receives `location`
fn octant(bounds: &Aabb, location: Vec3) -> usize {
    let center = bounds.center();
    (location.x >= center.x) as usize
        | ((location.y >= center.y) as usize) << 1
        | ((location.z >= center.z) as usize) << 2
}

fn octant_bounds(bounds: &Aabb, octant_index: usize) -> Aabb {
    let center = bounds.center();
    let pick = |bit: usize, low: f32, mid: f32, high: f32| {
        if octant_index & bit != 0 {
            (mid, high)
        } else {
            (low, mid)
        }
    };
    let (min_x, max_x) = pick(1, bounds.min.x, center.x, bounds.max.x);
    let (min_y, max_y) = pick(2, bounds.min.y, center.y, bounds.max.y);
    let (min_z, max_z) = pick(4, bounds.min.z, center.z, bounds.max.z);
    Aabb {
        min: Vec3::new(min_x, min_y, min_z),
        max: Vec3::new(max_x, max_y, max_z),
    }
}
