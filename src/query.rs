//! Choosing a cover point for a unit under threat
//!
//! The evaluator gathers resident points around the target, keeps the ones
//! inside the attack range window and tests them nearest-to-requester first.
//! A point qualifies when the requester can walk there and, standing or
//! crouched, something close blocks the direct line to the target while a
//! sideways lean still sees it. Force field points qualify when the target is
//! in plain sight through a force field close to the eye.
//!
//! All probes run outside the store lock; only the final `hold` and the
//! release of the previous point touch the store.

use std::fmt;
use std::sync::Arc;

use glam::Vec3;
use log::{debug, trace};

use crate::config::CoverQueryParams;
use crate::cover_point::{CoverPoint, ObjectId, WorldObject};
use crate::geometry::Aabb;
use crate::navigation::{AgentProfile, NavigationQuery};
use crate::physics::{PhysicsQuery, TraceChannel, TraceHit};
use crate::store::CoverStore;

/// Posture a cover point was validated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stance {
    /// Eye at the requester's standing eye height
    Standing,
    /// Eye at the requester's crouched eye height
    Crouched,
}

/// Why a candidate did not qualify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// No navigable path from the requester
    NoPath,
    /// The direct line reaches the target unobstructed, or hits nothing at all
    Exposed,
    /// The blocking object is further than the max object hit distance
    TooFar,
    /// The direct line is blocked by another unit
    BlockedByUnit,
    /// Neither lean side sees the target
    CannotLean,
    /// No force field close enough between point and target
    NoForceField,
    /// Another requester reserved the point first
    LostReservation,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RejectReason::NoPath => "no path",
            RejectReason::Exposed => "exposed",
            RejectReason::TooFar => "cover too far",
            RejectReason::BlockedByUnit => "blocked by unit",
            RejectReason::CannotLean => "cannot lean",
            RejectReason::NoForceField => "no force field in reach",
            RejectReason::LostReservation => "lost reservation",
        };
        f.write_str(reason)
    }
}

/// Diagnostic event emitted while evaluating candidates
#[derive(Debug, Clone, PartialEq)]
pub enum CoverEvent {
    /// A candidate failed; for stance failures the crouched reason is reported
    CandidateRejected { location: Vec3, reason: RejectReason },
    /// A candidate won and was reserved
    CandidateAccepted { location: Vec3, stance: Stance },
    /// No candidate qualified
    SearchFailed { candidates: usize },
}

/// Receiver of evaluator diagnostics
///
/// Events carry no control flow; a sink can only observe.
pub trait CoverEventSink: Send + Sync {
    fn record(&self, event: CoverEvent);
}

/// Sink discarding every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl CoverEventSink for NullSink {
    fn record(&self, _event: CoverEvent) {}
}

/// Unit looking for cover
#[derive(Debug, Clone, PartialEq)]
pub struct Requester {
    /// Identity, ignored by the requester's own probes
    pub id: ObjectId,
    /// Current position
    pub position: Vec3,
    /// Movement capabilities used for the path test
    pub agent: AgentProfile,
    /// Eye height above ground when standing
    pub standing_eye_height: f32,
    /// Eye height above ground when crouched
    pub crouched_eye_height: f32,
    /// Point reserved by the previous search
    pub current_cover: Option<Vec3>,
}

impl Requester {
    /// Create a requester with default agent and eye heights
    ///
    /// # Example
    ///
    /// ```
    /// use cover_points::{ObjectId, Requester};
    /// use glam::Vec3;
    ///
    /// let requester = Requester::new(ObjectId(7), Vec3::ZERO);
    /// assert!(requester.crouched_eye_height < requester.standing_eye_height);
    /// assert!(requester.current_cover.is_none());
    /// ```
    pub fn new(id: ObjectId, position: Vec3) -> Self {
        Self {
            id,
            position,
            agent: AgentProfile::default(),
            standing_eye_height: 160.0,
            crouched_eye_height: 90.0,
            current_cover: None,
        }
    }

    /// Set both eye heights
    pub fn with_eye_heights(mut self, standing: f32, crouched: f32) -> Self {
        self.standing_eye_height = standing;
        self.crouched_eye_height = crouched;
        self
    }

    /// Set the agent profile
    pub fn with_agent(mut self, agent: AgentProfile) -> Self {
        self.agent = agent;
        self
    }
}

/// Threat the requester seeks cover from
#[derive(Debug, Clone)]
pub struct CoverTarget {
    pub object: Arc<WorldObject>,
    pub position: Vec3,
}

impl CoverTarget {
    pub fn new(object: Arc<WorldObject>, position: Vec3) -> Self {
        Self { object, position }
    }

    fn is(&self, hit: &TraceHit) -> bool {
        hit.object.id == self.object.id
    }
}

/// Finds and reserves the best cover point for a requester
pub struct CoverQueryEvaluator {
    physics: Arc<dyn PhysicsQuery>,
    navigation: Arc<dyn NavigationQuery>,
    ground_offset: f32,
    sink: Arc<dyn CoverEventSink>,
}

impl CoverQueryEvaluator {
    /// Create an evaluator
    ///
    /// `ground_offset` is the height cover points were lifted above ground
    /// during generation; eye positions are measured from the ground.
    pub fn new(physics: Arc<dyn PhysicsQuery>, navigation: Arc<dyn NavigationQuery>, ground_offset: f32) -> Self {
        Self {
            physics,
            navigation,
            ground_offset,
            sink: Arc::new(NullSink),
        }
    }

    /// Route diagnostics to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn CoverEventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Free points in range of the target, nearest to the requester first
    ///
    /// Candidates come from a box centered on the target with half-extent
    /// `max_range / 2`. Taken points and points strictly closer to the target
    /// than `min_range` are discarded.
    pub fn gather_candidates(
        &self,
        store: &CoverStore,
        requester_position: Vec3,
        target_position: Vec3,
        params: &CoverQueryParams,
    ) -> Vec<CoverPoint> {
        let area = Aabb::from_center_extent(target_position, Vec3::splat(params.max_range * 0.5));
        let min_range_squared = params.min_range * params.min_range;

        let mut candidates: Vec<CoverPoint> = store
            .find_points(&area.into())
            .into_iter()
            .filter(|point| !point.taken)
            .filter(|point| point.location.distance_squared(target_position) >= min_range_squared)
            .collect();
        candidates.sort_by(|a, b| {
            a.location
                .distance_squared(requester_position)
                .total_cmp(&b.location.distance_squared(requester_position))
        });
        candidates
    }

    /// Find, reserve and record the best cover point against `target`
    ///
    /// The requester's previous point is released first. On success the
    /// reserved location is returned and stored in `requester.current_cover`;
    /// on failure `current_cover` is cleared.
    ///
    /// # Returns
    ///
    /// The reserved location, or `None` if no candidate qualifies or the
    /// store is shut down
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `params` fail validation; the store and
    /// the requester are left untouched
    pub fn find_best_cover(
        &self,
        store: &CoverStore,
        requester: &mut Requester,
        target: &CoverTarget,
        params: &CoverQueryParams,
    ) -> crate::Result<Option<Vec3>> {
        params.validate()?;
        Ok(self.search(store, requester, target, params))
    }

    fn search(
        &self,
        store: &CoverStore,
        requester: &mut Requester,
        target: &CoverTarget,
        params: &CoverQueryParams,
    ) -> Option<Vec3> {
        if store.is_shut_down() {
            return None;
        }
        if let Some(previous) = requester.current_cover.take() {
            store.release(previous);
        }

        let candidates = self.gather_candidates(store, requester.position, target.position, params);
        for candidate in &candidates {
            if store.is_shut_down() {
                return None;
            }
            match self.evaluate(candidate, requester, target, params) {
                Ok(stance) => {
                    if !store.hold(candidate.location) {
                        self.reject(candidate.location, RejectReason::LostReservation);
                        continue;
                    }
                    debug!(
                        "requester {} takes cover at {} ({:?})",
                        requester.id, candidate.location, stance
                    );
                    self.sink.record(CoverEvent::CandidateAccepted {
                        location: candidate.location,
                        stance,
                    });
                    requester.current_cover = Some(candidate.location);
                    return Some(candidate.location);
                }
                Err(reason) => self.reject(candidate.location, reason),
            }
        }

        debug!(
            "requester {} found no cover among {} candidates",
            requester.id,
            candidates.len()
        );
        self.sink.record(CoverEvent::SearchFailed {
            candidates: candidates.len(),
        });
        None
    }

    fn reject(&self, location: Vec3, reason: RejectReason) {
        trace!("cover candidate {} rejected: {}", location, reason);
        self.sink.record(CoverEvent::CandidateRejected { location, reason });
    }

    /// Path test, then standing, then crouched
    fn evaluate(
        &self,
        candidate: &CoverPoint,
        requester: &Requester,
        target: &CoverTarget,
        params: &CoverQueryParams,
    ) -> Result<Stance, RejectReason> {
        if !self
            .navigation
            .test_path(&requester.agent, requester.position, candidate.location)
        {
            return Err(RejectReason::NoPath);
        }
        self.evaluate_stance(candidate, requester.standing_eye_height, requester, target, params)
            .map(|()| Stance::Standing)
            .or_else(|_| {
                self.evaluate_stance(candidate, requester.crouched_eye_height, requester, target, params)
                    .map(|()| Stance::Crouched)
            })
    }

    fn evaluate_stance(
        &self,
        candidate: &CoverPoint,
        eye_height: f32,
        requester: &Requester,
        target: &CoverTarget,
        params: &CoverQueryParams,
    ) -> Result<(), RejectReason> {
        let eye = candidate.location + Vec3::Z * (eye_height - self.ground_offset);
        let ignore = Some(requester.id);

        let hit = self
            .physics
            .sweep_sphere(eye, target.position, params.probe_radius, TraceChannel::Visibility, ignore)
            .ok_or(RejectReason::Exposed)?;

        if candidate.force_field {
            if !target.is(&hit) {
                return Err(RejectReason::Exposed);
            }
            // plain sight, so the force field is the only protection
            return match self.physics.sweep_sphere(
                eye,
                target.position,
                params.probe_radius,
                TraceChannel::ForceField,
                ignore,
            ) {
                Some(field) if field.distance <= params.max_object_hit_distance => Ok(()),
                _ => Err(RejectReason::NoForceField),
            };
        }

        if target.is(&hit) {
            return Err(RejectReason::Exposed);
        }
        if hit.distance > params.max_object_hit_distance {
            return Err(RejectReason::TooFar);
        }
        if hit.object.is_unit() {
            return Err(RejectReason::BlockedByUnit);
        }
        if self.can_lean(eye, requester.id, target, params) {
            Ok(())
        } else {
            Err(RejectReason::CannotLean)
        }
    }

    /// Whether an eye offset sideways, to either side, sees the target
    fn can_lean(&self, eye: Vec3, requester: ObjectId, target: &CoverTarget, params: &CoverQueryParams) -> bool {
        let to_target = (target.position - eye).normalize_or_zero();
        let side = Vec3::new(to_target.y, -to_target.x, 0.0).normalize_or_zero();
        if side == Vec3::ZERO {
            return false;
        }

        [1.0, -1.0].into_iter().any(|sign| {
            let lean_eye = eye + side * sign * params.lean_offset;
            self.physics
                .sweep_sphere(
                    lean_eye,
                    target.position,
                    params.probe_radius,
                    TraceChannel::Visibility,
                    Some(requester),
                )
                .is_some_and(|hit| target.is(&hit))
        })
    }
}

impl fmt::Debug for CoverQueryEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoverQueryEvaluator")
            .field("ground_offset", &self.ground_offset)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cover_point::{CollisionClass, CoverPointDto};
    use crate::error::CoverError;
    use crate::navigation::{NavRect, RectNavMesh, TileId};
    use crate::physics::ColliderWorld;
    use glam::Vec2;
    use std::sync::Mutex;

    const REQUESTER: ObjectId = ObjectId(100);

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<CoverEvent>>);

    impl CoverEventSink for RecordingSink {
        fn record(&self, event: CoverEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl RecordingSink {
        fn events(&self) -> Vec<CoverEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    struct Fixture {
        world: Arc<ColliderWorld>,
        mesh: Arc<RectNavMesh>,
        store: CoverStore,
        target: CoverTarget,
        /// Keeps cover owners alive
        owners: Vec<Arc<WorldObject>>,
    }

    impl Fixture {
        /// Target unit at the origin, open ground all around
        fn new() -> Self {
            let world = Arc::new(ColliderWorld::new());
            let target_object = Arc::new(WorldObject::new(1, "target", CollisionClass::Unit));
            world.add_box(target_object.clone(), Vec3::new(0.0, 0.0, 90.0), Vec3::new(20.0, 20.0, 90.0));

            let mesh = Arc::new(RectNavMesh::new(Vec2::splat(-2000.0), 1000.0, 4, 4));
            mesh.add_rect(NavRect::new(Vec2::splat(-2000.0), Vec2::splat(2000.0), 0.0));

            let store = CoverStore::new(Aabb::from_center_extent(Vec3::ZERO, Vec3::splat(10_000.0)), 54.0);
            Self {
                world,
                mesh,
                store,
                target: CoverTarget::new(target_object, Vec3::new(0.0, 0.0, 90.0)),
                owners: Vec::new(),
            }
        }

        fn add_box(&mut self, id: u64, class: CollisionClass, center: Vec3, half: Vec3) {
            let object = Arc::new(WorldObject::new(id, format!("object-{id}"), class));
            self.world.add_box(object.clone(), center, half);
            self.owners.push(object);
        }

        /// Waist-high wall 40 in front of a point at `x = -400`
        fn low_wall(&mut self, id: u64, class: CollisionClass, half_width: f32) {
            self.add_box(id, class, Vec3::new(-350.0, 0.0, 60.0), Vec3::new(10.0, half_width, 60.0));
        }

        fn add_point(&mut self, location: Vec3, force_field: bool) {
            let owner = Arc::new(WorldObject::new(900 + self.owners.len() as u64, "cover", CollisionClass::Static));
            assert_eq!(self.store.add_points(vec![CoverPointDto::new(&owner, location, force_field)]), 1);
            self.owners.push(owner);
        }

        fn evaluator(&self) -> CoverQueryEvaluator {
            CoverQueryEvaluator::new(self.world.clone(), self.mesh.clone(), 10.0)
        }

        fn run(&self, sink: &Arc<RecordingSink>) -> (Option<Vec3>, Requester) {
            let mut requester = Requester::new(REQUESTER, Vec3::new(-800.0, 0.0, 0.0));
            let found = self.evaluator().with_sink(sink.clone()).find_best_cover(
                &self.store,
                &mut requester,
                &self.target,
                &CoverQueryParams::default(),
            )
            .unwrap();
            (found, requester)
        }

        fn taken(&self, location: Vec3) -> bool {
            self.store
                .find_points(&Aabb::from_center_extent(location, Vec3::ONE).into())
                .iter()
                .any(|p| p.taken)
        }
    }

    fn rejections(sink: &RecordingSink) -> Vec<RejectReason> {
        sink.events()
            .into_iter()
            .filter_map(|event| match event {
                CoverEvent::CandidateRejected { reason, .. } => Some(reason),
                _ => None,
            })
            .collect()
    }

    const POINT: Vec3 = Vec3::new(-400.0, 0.0, 10.0);

    #[test]
    fn test_range_window_filters_candidates() {
        let mut fixture = Fixture::new();
        fixture.add_point(Vec3::new(50.0, 0.0, 0.0), false);
        fixture.add_point(Vec3::new(300.0, 0.0, 0.0), false);

        let candidates = fixture.evaluator().gather_candidates(
            &fixture.store,
            Vec3::new(800.0, 0.0, 0.0),
            Vec3::ZERO,
            &CoverQueryParams::default(),
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].location, Vec3::new(300.0, 0.0, 0.0));
    }

    #[test]
    fn test_candidates_sorted_by_requester_distance() {
        let mut fixture = Fixture::new();
        fixture.add_point(Vec3::new(-300.0, 0.0, 0.0), false);
        fixture.add_point(Vec3::new(300.0, 0.0, 0.0), false);
        fixture.add_point(Vec3::new(0.0, 450.0, 0.0), false);
        // outside the candidate box
        fixture.add_point(Vec3::new(600.0, 0.0, 0.0), false);
        fixture.store.hold(Vec3::new(0.0, 450.0, 0.0));

        let candidates = fixture.evaluator().gather_candidates(
            &fixture.store,
            Vec3::new(800.0, 0.0, 0.0),
            Vec3::ZERO,
            &CoverQueryParams::default(),
        );
        let locations: Vec<Vec3> = candidates.iter().map(|p| p.location).collect();
        assert_eq!(locations, vec![Vec3::new(300.0, 0.0, 0.0), Vec3::new(-300.0, 0.0, 0.0)]);
    }

    #[test]
    fn test_crouched_behind_low_wall() {
        let mut fixture = Fixture::new();
        fixture.low_wall(2, CollisionClass::Static, 50.0);
        fixture.add_point(POINT, false);

        let sink = Arc::new(RecordingSink::default());
        let (found, requester) = fixture.run(&sink);

        assert_eq!(found, Some(POINT));
        assert_eq!(requester.current_cover, Some(POINT));
        assert!(fixture.taken(POINT));
        assert!(sink.events().contains(&CoverEvent::CandidateAccepted {
            location: POINT,
            stance: Stance::Crouched,
        }));
    }

    #[test]
    fn test_exposed_point_is_rejected() {
        let mut fixture = Fixture::new();
        fixture.add_point(POINT, false);

        let sink = Arc::new(RecordingSink::default());
        let (found, requester) = fixture.run(&sink);

        assert_eq!(found, None);
        assert_eq!(requester.current_cover, None);
        assert!(!fixture.taken(POINT));
        assert_eq!(rejections(&sink), vec![RejectReason::Exposed]);
        assert!(sink.events().contains(&CoverEvent::SearchFailed { candidates: 1 }));
    }

    #[test]
    fn test_wide_wall_blocks_lean() {
        let mut fixture = Fixture::new();
        fixture.low_wall(2, CollisionClass::Static, 300.0);
        fixture.add_point(POINT, false);

        let sink = Arc::new(RecordingSink::default());
        assert_eq!(fixture.run(&sink).0, None);
        assert_eq!(rejections(&sink), vec![RejectReason::CannotLean]);
    }

    #[test]
    fn test_unit_is_not_cover() {
        let mut fixture = Fixture::new();
        fixture.low_wall(2, CollisionClass::Unit, 50.0);
        fixture.add_point(POINT, false);

        let sink = Arc::new(RecordingSink::default());
        assert_eq!(fixture.run(&sink).0, None);
        assert_eq!(rejections(&sink), vec![RejectReason::BlockedByUnit]);
    }

    #[test]
    fn test_distant_cover_is_rejected() {
        let mut fixture = Fixture::new();
        // 335 from the eye once inflated by the probe radius
        fixture.add_box(2, CollisionClass::Static, Vec3::new(-50.0, 0.0, 60.0), Vec3::new(10.0, 50.0, 60.0));
        fixture.add_point(POINT, false);

        let sink = Arc::new(RecordingSink::default());
        assert_eq!(fixture.run(&sink).0, None);
        assert_eq!(rejections(&sink), vec![RejectReason::TooFar]);
    }

    #[test]
    fn test_force_field_point() {
        let mut fixture = Fixture::new();
        fixture.add_box(2, CollisionClass::ForceField, Vec3::new(-350.0, 0.0, 150.0), Vec3::new(10.0, 200.0, 150.0));
        fixture.add_point(POINT, true);

        let sink = Arc::new(RecordingSink::default());
        assert_eq!(fixture.run(&sink).0, Some(POINT));
        assert!(sink.events().contains(&CoverEvent::CandidateAccepted {
            location: POINT,
            stance: Stance::Standing,
        }));
    }

    #[test]
    fn test_force_field_out_of_reach() {
        let mut fixture = Fixture::new();
        fixture.add_box(2, CollisionClass::ForceField, Vec3::new(-50.0, 0.0, 150.0), Vec3::new(10.0, 200.0, 150.0));
        fixture.add_point(POINT, true);

        let sink = Arc::new(RecordingSink::default());
        assert_eq!(fixture.run(&sink).0, None);
        assert_eq!(rejections(&sink), vec![RejectReason::NoForceField]);
    }

    #[test]
    fn test_unreachable_point() {
        let mut fixture = Fixture::new();
        fixture.low_wall(2, CollisionClass::Static, 50.0);
        fixture.add_point(POINT, false);

        let mut requester = Requester::new(REQUESTER, Vec3::new(5000.0, 5000.0, 0.0));
        let sink = Arc::new(RecordingSink::default());
        let found = fixture.evaluator().with_sink(sink.clone()).find_best_cover(
            &fixture.store,
            &mut requester,
            &fixture.target,
            &CoverQueryParams::default(),
        )
        .unwrap();
        assert_eq!(found, None);
        assert_eq!(rejections(&sink), vec![RejectReason::NoPath]);
    }

    #[test]
    fn test_previous_cover_is_released() {
        let mut fixture = Fixture::new();
        let previous = Vec3::new(-1500.0, 0.0, 10.0);
        fixture.add_point(previous, false);
        assert!(fixture.store.hold(previous));

        let mut requester = Requester::new(REQUESTER, Vec3::new(-800.0, 0.0, 0.0));
        requester.current_cover = Some(previous);
        let found = fixture.evaluator().find_best_cover(
            &fixture.store,
            &mut requester,
            &fixture.target,
            &CoverQueryParams::default(),
        )
        .unwrap();

        assert_eq!(found, None);
        assert_eq!(requester.current_cover, None);
        assert!(!fixture.taken(previous));
    }

    #[test]
    fn test_nearest_valid_candidate_wins() {
        let mut fixture = Fixture::new();
        fixture.low_wall(2, CollisionClass::Static, 50.0);
        fixture.add_box(3, CollisionClass::Static, Vec3::new(350.0, 0.0, 60.0), Vec3::new(10.0, 50.0, 60.0));
        let far = Vec3::new(400.0, 0.0, 10.0);
        fixture.add_point(far, false);
        fixture.add_point(POINT, false);

        let sink = Arc::new(RecordingSink::default());
        assert_eq!(fixture.run(&sink).0, Some(POINT));
        assert!(!fixture.taken(far));
    }

    /// Navigation that lets a rival reserve `contested` during the path test
    struct RivalNavigation {
        inner: Arc<RectNavMesh>,
        store: Arc<CoverStore>,
        contested: Vec3,
    }

    impl NavigationQuery for RivalNavigation {
        fn project_point(&self, point: Vec3, extent: Vec3) -> Option<Vec3> {
            self.inner.project_point(point, extent)
        }

        fn test_path(&self, agent: &AgentProfile, from: Vec3, to: Vec3) -> bool {
            if to == self.contested {
                self.store.hold(to);
            }
            self.inner.test_path(agent, from, to)
        }

        fn tile_boundary_edges(&self, tile: TileId) -> Vec<[Vec3; 2]> {
            self.inner.tile_boundary_edges(tile)
        }

        fn tile_bounds(&self, tile: TileId) -> Option<Aabb> {
            self.inner.tile_bounds(tile)
        }

        fn tile_height(&self) -> f32 {
            self.inner.tile_height()
        }
    }

    #[test]
    fn test_lost_reservation_moves_on() {
        let mut fixture = Fixture::new();
        fixture.low_wall(2, CollisionClass::Static, 50.0);
        fixture.add_box(3, CollisionClass::Static, Vec3::new(350.0, 0.0, 60.0), Vec3::new(10.0, 50.0, 60.0));
        let far = Vec3::new(400.0, 0.0, 10.0);
        fixture.add_point(far, false);
        fixture.add_point(POINT, false);

        let store = Arc::new(std::mem::replace(
            &mut fixture.store,
            CoverStore::new(Aabb::from_center_extent(Vec3::ZERO, Vec3::ONE), 0.0),
        ));
        let navigation = Arc::new(RivalNavigation {
            inner: fixture.mesh.clone(),
            store: store.clone(),
            contested: POINT,
        });
        let sink = Arc::new(RecordingSink::default());
        let evaluator = CoverQueryEvaluator::new(fixture.world.clone(), navigation, 10.0).with_sink(sink.clone());

        let mut requester = Requester::new(REQUESTER, Vec3::new(-800.0, 0.0, 0.0));
        let found = evaluator
            .find_best_cover(&store, &mut requester, &fixture.target, &CoverQueryParams::default())
            .unwrap();

        assert_eq!(found, Some(far));
        assert_eq!(rejections(&sink), vec![RejectReason::LostReservation]);
    }

    #[test]
    fn test_shut_down_store_finds_nothing() {
        let mut fixture = Fixture::new();
        fixture.low_wall(2, CollisionClass::Static, 50.0);
        fixture.add_point(POINT, false);
        fixture.store.shutdown();

        let sink = Arc::new(RecordingSink::default());
        assert_eq!(fixture.run(&sink).0, None);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_inverted_range_window_is_rejected() {
        let mut fixture = Fixture::new();
        fixture.low_wall(2, CollisionClass::Static, 50.0);
        fixture.add_point(POINT, false);
        let previous = Vec3::new(-1500.0, 0.0, 10.0);
        fixture.add_point(previous, false);
        assert!(fixture.store.hold(previous));

        let sink = Arc::new(RecordingSink::default());
        let mut requester = Requester::new(REQUESTER, Vec3::new(-800.0, 0.0, 0.0));
        requester.current_cover = Some(previous);
        let inverted = CoverQueryParams {
            min_range: 1000.0,
            max_range: 100.0,
            ..Default::default()
        };
        let result = fixture
            .evaluator()
            .with_sink(sink.clone())
            .find_best_cover(&fixture.store, &mut requester, &fixture.target, &inverted);

        assert!(matches!(result, Err(CoverError::InvalidConfig(_))));
        assert!(sink.events().is_empty());
        assert_eq!(requester.current_cover, Some(previous));
        assert!(fixture.taken(previous));
        assert!(!fixture.taken(POINT));
    }

    #[test]
    fn test_zero_lean_offset_is_rejected() {
        let mut fixture = Fixture::new();
        fixture.low_wall(2, CollisionClass::Static, 50.0);
        fixture.add_point(POINT, false);

        let mut requester = Requester::new(REQUESTER, Vec3::new(-800.0, 0.0, 0.0));
        let params = CoverQueryParams {
            lean_offset: 0.0,
            ..Default::default()
        };
        let result = fixture
            .evaluator()
            .find_best_cover(&fixture.store, &mut requester, &fixture.target, &params);

        assert!(result.is_err());
        assert!(!fixture.taken(POINT));
    }
}
