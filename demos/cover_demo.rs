//! Demonstration of cover generation and a cover query
//!
//! Run with `RUST_LOG=debug cargo run --example cover_demo` to see the
//! generation and query logs.

use std::sync::Arc;

use cover_points::*;
use glam::Vec2;

fn main() -> Result<()> {
    env_logger::init();

    // A walkable courtyard with a wall along its east side and a crate in the middle
    let physics = Arc::new(ColliderWorld::new());
    let ground = Arc::new(WorldObject::new(1, "ground", CollisionClass::Static));
    physics.add_box(ground, Vec3::new(0.0, 0.0, -10.0), Vec3::new(4000.0, 4000.0, 10.0));
    let wall = Arc::new(WorldObject::new(2, "east wall", CollisionClass::Static));
    physics.add_box(wall.clone(), Vec3::new(1030.0, 0.0, 150.0), Vec3::new(20.0, 1000.0, 150.0));
    let crate_box = Arc::new(WorldObject::new(3, "crate", CollisionClass::Static));
    physics.add_box(crate_box.clone(), Vec3::new(0.0, 0.0, 60.0), Vec3::new(50.0, 50.0, 60.0));

    let navigation = Arc::new(RectNavMesh::new(Vec2::splat(-1000.0), 1000.0, 2, 2).with_tile_height(200.0));
    let (_, dirty) = navigation.add_rect(NavRect::new(Vec2::splat(-1000.0), Vec2::splat(1000.0), 0.0));

    let config = CoverConfigBuilder::new().worker_threads(2).build()?;
    let system = CoverSystem::init(config, navigation.clone(), physics.clone())?;

    // Tile rebuilds arrive through the channel and are flushed on a timer
    let channel = Arc::new(TileUpdateChannel::new());
    system.subscribe(&channel);
    let timer = IntervalTimer::start(channel.clone(), TileChannelConfig::default());
    channel.notify_tiles_updated(dirty);

    if let Some(source) = CoverSource::from_colliders(&physics, crate_box.clone()) {
        system.generate_cover_for_object(source);
    }

    // Give the timer a chance to flush, then wait for the workers
    std::thread::sleep(TileChannelConfig::default().interval * 2);
    system.wait_for_generation();
    drop(timer);

    let everything = Aabb::from_center_extent(Vec3::ZERO, Vec3::splat(2000.0));
    let points = system.find_cover_near(everything);
    println!("Generated {} cover points", points.len());
    let along_wall = points.iter().filter(|p| p.owner.id() == wall.id).count();
    println!("  {} along the east wall", along_wall);
    println!("  {} around the crate", points.len() - along_wall);

    // A rifleman west of the crate looks for cover from a threat east of it
    let threat = Arc::new(WorldObject::new(10, "threat", CollisionClass::Unit));
    physics.add_box(threat.clone(), Vec3::new(400.0, 0.0, 90.0), Vec3::new(20.0, 20.0, 90.0));
    let target = CoverTarget::new(threat, Vec3::new(400.0, 0.0, 90.0));
    let mut rifleman = Requester::new(ObjectId(20), Vec3::new(-600.0, 0.0, 0.0));

    match system.find_best_cover(&mut rifleman, &target, &CoverQueryParams::default())? {
        Some(location) => println!("\nRifleman takes cover at {}", location),
        None => println!("\nNo cover found for the rifleman"),
    }

    // Destroying the crate makes its points stale
    physics.remove_object(crate_box.id);
    drop(crate_box);
    let evicted = system.remove_stale_cover_around(Vec3::ZERO, Vec3::splat(200.0));
    println!("Evicted {} stale points after the crate was destroyed", evicted);

    system.teardown();
    Ok(())
}
