//! Progressive accumulation end to end: load an asset, commit it, and check
//! that every tick adds exactly one sample and that camera changes reset the
//! film.

use cgmath::{Deg, Point3};
use trace_view::camera::{Camera, OrbitController, Projection};
use trace_view::loader::load_scene;
use trace_view::scene::PointLight;
use trace_view::tracer::{PathTracer, TracerScene};

mod common;

#[tokio::test]
async fn one_tick_accumulates_one_sample() {
    let (_dir, path) = common::write_asset("scene.glb", &common::triangle_scene_glb(2));
    let scene = load_scene(&path, &mut |g| g.attach_bounds_tree())
        .await
        .unwrap();

    let lights = vec![PointLight {
        position: Point3::new(5.0, 5.0, 5.0),
        color: [1.0, 1.0, 1.0],
        intensity: 50.0,
    }];
    let committed = TracerScene::from_snapshot(&scene.snapshot(lights));
    assert_eq!(committed.instances.len(), 2);
    assert_eq!(committed.lights.len(), 1);

    let mut tracer = PathTracer::new(16, 16);
    assert!(!tracer.has_scene());
    tracer.attach_scene(committed);
    assert!(tracer.has_scene());

    let camera = Camera::looking_at(Point3::new(3.0, 3.0, 3.0), Point3::new(0.5, 0.5, 0.0));
    let projection = Projection::new(16, 16, Deg(75.0), 0.1, 1000.0);

    for tick in 1..=4u32 {
        tracer.render_sample(&camera, &projection);
        assert_eq!(tracer.film().sample_count(), tick);
    }
}

#[tokio::test]
async fn camera_movement_resets_the_accumulation() {
    let (_dir, path) = common::write_asset("scene.glb", &common::triangle_scene_glb(1));
    let scene = load_scene(&path, &mut |g| g.attach_bounds_tree())
        .await
        .unwrap();
    let committed = TracerScene::from_snapshot(&scene.snapshot(Vec::new()));

    let mut tracer = PathTracer::new(8, 8);
    tracer.attach_scene(committed);
    let mut camera = Camera::looking_at(Point3::new(3.0, 3.0, 3.0), Point3::new(0.0, 0.0, 0.0));
    let projection = Projection::new(8, 8, Deg(75.0), 0.1, 1000.0);

    tracer.render_sample(&camera, &projection);
    tracer.render_sample(&camera, &projection);
    assert_eq!(tracer.film().sample_count(), 2);

    // The frame driver resets on any controller-reported movement; this is
    // the same call it makes.
    let mut controller = OrbitController::new(0.005, 0.1);
    controller.update(&mut camera, instant::Duration::from_millis(16));
    controller.handle_orbit(50.0, 0.0);
    let moved = controller.update(&mut camera, instant::Duration::from_millis(16));
    assert!(moved);
    tracer.reset_accumulation();
    assert_eq!(tracer.film().sample_count(), 0);

    // Accumulation starts over afterwards.
    tracer.render_sample(&camera, &projection);
    assert_eq!(tracer.film().sample_count(), 1);
}

#[test]
fn rendering_without_a_scene_is_a_no_op() {
    let mut tracer = PathTracer::new(8, 8);
    let camera = Camera::looking_at(Point3::new(3.0, 3.0, 3.0), Point3::new(0.0, 0.0, 0.0));
    let projection = Projection::new(8, 8, Deg(75.0), 0.1, 1000.0);

    tracer.render_sample(&camera, &projection);
    assert_eq!(
        tracer.film().sample_count(),
        0,
        "no sample may be recorded before the scene is attached"
    );
}
