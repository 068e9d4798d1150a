//! End-to-end frames through `PathTracer` on a small closed room.

use hybrid_pt::prelude::*;
use hybrid_pt::scene_lights::SceneLight;

const W: u32 = 16;
const H: u32 = 12;

fn room(entities: &str) -> World {
    let mut b = WorldBuilder::new("pipeline_room").entities(entities);
    let m = b.add_material(Material::default());
    b.add_room(Vec3::ZERO, Vec3::splat(8.0), m);
    b.build()
}

fn camera() -> Camera {
    Camera::look_at(Vec3::new(4.0, 1.0, 4.0), Vec3::new(4.0, 7.0, 4.0), Vec3::Z)
}

fn tracer(settings: Settings, entities: &str) -> PathTracer {
    let mut pt = PathTracer::new(settings, None);
    pt.load_world(room(entities));
    pt
}

const ONE_LIGHT: &str = r#"{ "classname" "light" "origin" "4 6 6" "light" "2" "radius" "30" }"#;

#[test]
fn light_change_resets_accumulation() {
    let mut pt = tracer(Settings::default(), "");
    let h = pt
        .lights_mut()
        .allocate(Light::point(Vec3::new(4.0, 5.0, 4.0), Vec3::ONE, 1.0, 20.0))
        .unwrap();

    for _ in 0..3 {
        pt.render_frame(&camera(), W, H);
    }
    assert_eq!(pt.accumulation().min_count(), 3);

    pt.lights_mut().update(h, |l| l.origin.x += 1.0);
    let stats = pt.render_frame(&camera(), W, H);
    assert!(stats.lights_changed);
    assert!(stats.reset);
    assert!(pt.accumulation().counts().iter().all(|&c| c == 1));

    // Unchanged lights keep accumulating
    let stats = pt.render_frame(&camera(), W, H);
    assert!(!stats.lights_changed);
    assert_eq!(pt.accumulation().min_count(), 2);
}

#[test]
fn static_lights_follow_settings() {
    let mut pt = tracer(Settings::default(), ONE_LIGHT);
    assert_eq!(pt.static_lights().len(), 1);
    assert_eq!(pt.render_frame(&camera(), W, H).scene_lights, 1);

    pt.apply_setting("static_lights", "off").unwrap();
    let stats = pt.render_frame(&camera(), W, H);
    assert_eq!(stats.scene_lights, 0);
    assert!(stats.reset);

    pt.apply_setting("static_lights", "on").unwrap();
    pt.apply_setting("mode", "dynamic").unwrap();
    assert_eq!(pt.render_frame(&camera(), W, H).scene_lights, 0);
}

#[test]
fn legacy_lights_stand_in_for_culled_pool() {
    let mut pt = tracer(Settings::default(), ONE_LIGHT);
    // Far behind the camera: culled
    pt.lights_mut()
        .allocate(Light::point(Vec3::new(4.0, -500.0, 4.0), Vec3::ONE, 1.0, 10.0))
        .unwrap();
    pt.set_legacy_lights(vec![Light::point(Vec3::new(2.0, 4.0, 4.0), Vec3::ONE, 1.0, 25.0)]);

    let stats = pt.render_frame(&camera(), W, H);
    assert_eq!(stats.visible_lights, 0);
    assert_eq!(stats.scene_lights, 2);
    assert_eq!(pt.aggregator().dynamic_count(), 1);
    let legacy: &SceneLight = &pt.aggregator().lights()[0];
    assert_eq!(legacy.origin(), Vec3::new(2.0, 4.0, 4.0));
}

#[test]
fn visible_pool_lights_replace_legacy() {
    let mut pt = tracer(Settings::default(), "");
    pt.set_legacy_lights(vec![Light::point(Vec3::new(2.0, 4.0, 4.0), Vec3::ONE, 1.0, 25.0)]);
    pt.lights_mut()
        .allocate(Light::point(Vec3::new(5.0, 5.0, 5.0), Vec3::ONE, 1.0, 20.0))
        .unwrap();
    let stats = pt.render_frame(&camera(), W, H);
    assert_eq!(stats.visible_lights, 1);
    assert_eq!(stats.scene_lights, 1);
    assert_eq!(pt.aggregator().lights()[0].origin(), Vec3::new(5.0, 5.0, 5.0));
}

#[test]
fn same_seed_same_image() {
    let mut a = tracer(Settings::default(), ONE_LIGHT);
    let mut b = tracer(Settings::default(), ONE_LIGHT);
    for _ in 0..2 {
        a.render_frame(&camera(), W, H);
        b.render_frame(&camera(), W, H);
    }
    assert_eq!(a.color(), b.color());
    assert_eq!(a.depth(), b.depth());

    let mut s = Settings::default();
    s.seed = 7;
    let mut c = tracer(s, ONE_LIGHT);
    c.render_frame(&camera(), W, H);
    c.render_frame(&camera(), W, H);
    assert_ne!(a.color(), c.color());
}

#[test]
fn lit_room_is_brighter_than_unlit() {
    let mut lit = tracer(Settings::default(), ONE_LIGHT);
    let mut dark = tracer(Settings::default(), "");
    lit.render_frame(&camera(), W, H);
    dark.render_frame(&camera(), W, H);
    let sum = |pt: &PathTracer| pt.color().iter().map(|c| c.x + c.y + c.z).sum::<f32>();
    assert!(sum(&lit) > sum(&dark));
    assert!(lit.color().iter().all(|c| c.is_finite() && c.min_element() >= 0.0));
}

#[test]
fn aovs_describe_primary_hits() {
    let mut pt = tracer(Settings::default(), ONE_LIGHT);
    pt.render_frame(&camera(), W, H);
    // Closed room: every primary ray lands on a wall within the room diagonal
    let diag = Vec3::splat(8.0).length();
    assert!(pt.depth().iter().all(|&d| d > 0.0 && d <= diag));
    assert!(pt
        .normal()
        .iter()
        .all(|n| (n.length() - 1.0).abs() < 1e-3));
}

#[test]
fn progressive_tiles_cover_the_image() {
    let mut s = Settings::default();
    s.tile_size = 8;
    s.quality = Quality::Low;
    let mut pt = tracer(s, ONE_LIGHT);

    // 64x64 in 8px tiles = 64 tiles, 16 per frame
    let mut complete_at = None;
    for f in 0..4 {
        let stats = pt.render_frame(&camera(), 64, 64);
        assert_eq!(stats.tiles, 16);
        assert_eq!(stats.pixels, 16 * 64);
        if stats.pass_complete {
            complete_at = Some(f);
        }
    }
    assert_eq!(complete_at, Some(3));
    assert_eq!(pt.accumulation().min_count(), 1);
}

#[test]
fn status_report_lists_state() {
    let mut s = Settings::default();
    s.validation_stride = 4;
    let mut pt = tracer(s, ONE_LIGHT);
    pt.render_frame(&camera(), W, H);
    let report = pt.status_report();
    assert!(report.contains("path tracing: enabled"));
    assert!(report.contains("1 static"));
    assert!(report.contains("mode: all"));
    assert!(report.contains("quality: medium"));
    assert!(report.contains(&format!("{W}x{H}")));
    assert!(report.contains("validation software"));
    assert!(report.contains("build: "));
}
