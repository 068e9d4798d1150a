//! Backend selection, fallback and parity through the full frame loop.

use hybrid_pt::accel::MeshBatch;
use hybrid_pt::backend::{BackendId, BlasId, Instance};
use hybrid_pt::scene_lights::SceneLight;
use hybrid_pt::prelude::*;

fn room() -> World {
    let mut b = WorldBuilder::new("backend_room").entities(
        r#"{ "classname" "light" "origin" "4 6 6" "light" "2" "radius" "30" }"#,
    );
    let grey = b.add_material(Material::default());
    let shiny = b.add_material(Material {
        metallic: 1.0,
        roughness: 0.3,
        ..Default::default()
    });
    b.add_room(Vec3::ZERO, Vec3::splat(8.0), grey);
    b.add_quad(
        [
            Vec3::new(2.0, 5.0, 0.5),
            Vec3::new(6.0, 5.0, 0.5),
            Vec3::new(6.0, 5.0, 3.0),
            Vec3::new(2.0, 5.0, 3.0),
        ],
        shiny,
    );
    b.build()
}

fn camera() -> Camera {
    Camera::look_at(Vec3::new(4.0, 1.0, 4.0), Vec3::new(4.0, 7.0, 2.0), Vec3::Z)
}

fn with_hardware(settings: Settings, hw: EmulatedHardware) -> PathTracer {
    let mut pt = PathTracer::new(settings, Some(Box::new(hw)));
    pt.load_world(room());
    pt
}

#[test]
fn auto_prefers_hardware_when_present() {
    let mut pt = with_hardware(Settings::default(), EmulatedHardware::new());
    let stats = pt.render_frame(&camera(), 8, 8);
    assert!(stats.hardware);
    assert_eq!(pt.backend_state(), BackendState::HardwareActive);
    assert!(pt.controller().last_build().unwrap().triangles_built >= 14);
}

#[test]
fn no_hardware_runs_software() {
    let mut pt = PathTracer::new(Settings::default(), None);
    pt.load_world(room());
    let stats = pt.render_frame(&camera(), 8, 8);
    assert!(!stats.hardware);
    assert_eq!(pt.backend_state(), BackendState::SoftwareActive);
    assert!(stats.pixels > 0);
}

#[test]
fn probe_failure_falls_back_and_keeps_rendering() {
    let hw = EmulatedHardware::new().with_probe_failure("no ray tracing extension");
    let mut pt = with_hardware(Settings::default(), hw);
    let stats = pt.render_frame(&camera(), 8, 8);
    assert!(!stats.hardware);
    assert_eq!(pt.backend_state(), BackendState::Unavailable);
    assert_eq!(stats.pixels, 64);
    assert!(pt.color().iter().any(|c| c.max_element() > 0.0));
    assert!(pt.hardware_status().contains("no ray tracing extension"));
}

#[test]
fn build_failure_falls_back() {
    let hw = EmulatedHardware::new().with_build_failure("out of device memory");
    let mut pt = with_hardware(Settings::default(), hw);
    let stats = pt.render_frame(&camera(), 8, 8);
    assert!(!stats.hardware);
    assert_eq!(stats.pixels, 64);
}

#[test]
fn runtime_fault_switches_to_software_until_reconfigured() {
    let hw = EmulatedHardware::new().with_fault_after_uploads(1, "device lost");
    let mut pt = with_hardware(Settings::default(), hw);

    let first = pt.render_frame(&camera(), 8, 8);
    assert!(first.hardware);
    // Fault collected at the end of the frame
    assert_eq!(pt.backend_state(), BackendState::Unavailable);

    let second = pt.render_frame(&camera(), 8, 8);
    assert!(!second.hardware);
    assert_eq!(second.pixels, 64);

    // A configuration edit re-evaluates and brings hardware back
    pt.apply_setting("backend", "hardware").unwrap();
    let third = pt.render_frame(&camera(), 8, 8);
    assert!(third.hardware);
}

#[test]
fn software_preference_ignores_hardware() {
    let mut s = Settings::default();
    s.backend = BackendPreference::Software;
    let mut pt = with_hardware(s, EmulatedHardware::new());
    assert!(!pt.render_frame(&camera(), 8, 8).hardware);

    pt.apply_setting("hardware", "off").unwrap();
    pt.apply_setting("backend", "auto").unwrap();
    assert!(!pt.render_frame(&camera(), 8, 8).hardware);

    pt.apply_setting("hardware", "on").unwrap();
    assert!(pt.render_frame(&camera(), 8, 8).hardware);
}

#[test]
fn hardware_matches_software_image() {
    let mut hw = with_hardware(Settings::default(), EmulatedHardware::new());
    let mut sw = PathTracer::new(Settings::default(), None);
    sw.load_world(room());

    for _ in 0..2 {
        hw.render_frame(&camera(), 12, 8);
        sw.render_frame(&camera(), 12, 8);
    }
    assert!(hw.hardware_active());
    let max_err = hw
        .color()
        .iter()
        .zip(sw.color())
        .map(|(a, b)| (*a - *b).abs().max_element())
        .fold(0.0f32, f32::max);
    assert!(max_err < 1e-3, "max channel error {max_err}");
    for (a, b) in hw.depth().iter().zip(sw.depth()) {
        assert!((a - b).abs() < 1e-3);
    }
}

#[test]
fn parity_recorded_for_both_backends() {
    let mut s = Settings::default();
    s.validation_stride = 2;
    let mut pt = with_hardware(s, EmulatedHardware::new());

    pt.render_frame(&camera(), 8, 8);
    let hw = pt.validator().record(BackendId::Hardware).unwrap().clone();
    assert_eq!(hw.map, "backend_room");
    assert_eq!((hw.width, hw.height), (8, 8));
    assert_eq!(hw.samples, 16);

    pt.apply_setting("backend", "software").unwrap();
    pt.render_frame(&camera(), 8, 8);
    let sw = pt.validator().record(BackendId::Software).unwrap();
    assert_eq!(sw.rmse, 0.0, "software validated against itself");

    let parity = pt.validator().last_parity().unwrap();
    assert!(!parity.regression);
    assert!(pt.status_report().contains("parity delta"));
}

/// Device that accepts every build but never reports its top level ready.
struct StalledDevice {
    blas: u32,
}

impl RayQuery for StalledDevice {
    fn closest_hit(&self, _ray: &hybrid_pt::util::Ray) -> Option<Hit> {
        panic!("stalled device must not be queried");
    }

    fn backend_name(&self) -> &str {
        "stalled"
    }
}

impl HardwareBackend for StalledDevice {
    fn name(&self) -> &str {
        "stalled"
    }

    fn probe(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear(&mut self) {
        self.blas = 0;
    }

    fn build_blas(&mut self, _batch: &MeshBatch) -> Result<BlasId> {
        self.blas += 1;
        Ok(BlasId(self.blas - 1))
    }

    fn build_tlas(&mut self, _instances: &[Instance]) -> Result<()> {
        Ok(())
    }

    fn upload_lights(&mut self, _lights: &[SceneLight]) -> Result<()> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn take_fault(&mut self) -> Option<Error> {
        None
    }

    fn as_ray_query(&self) -> &dyn RayQuery {
        self
    }
}

#[test]
fn unready_hardware_is_recorded_as_software() {
    let mut s = Settings::default();
    s.validation_stride = 2;
    let mut pt = PathTracer::new(s, Some(Box::new(StalledDevice { blas: 0 })));
    pt.load_world(room());

    let stats = pt.render_frame(&camera(), 8, 8);
    assert_eq!(pt.backend_state(), BackendState::HardwareActive);
    assert!(!stats.hardware, "software traced the frame");
    assert_eq!(stats.pixels, 64);

    let sw = pt.validator().record(BackendId::Software).expect("software record");
    assert_eq!(sw.rmse, 0.0);
    assert!(pt.validator().record(BackendId::Hardware).is_none());
}
