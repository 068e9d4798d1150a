//! The path tracer context.
//!
//! One [`PathTracer`] owns every piece of per-session state: the loaded world
//! and its software tracer, the light pool, the scene light aggregator, the
//! backend controller, the accumulation / denoise buffers, the tile scheduler
//! and the validator. A frame runs strictly in this order:
//!
//! 1. backend selection (controller re-evaluates on config change)
//! 2. light culling and interaction refresh
//! 3. scene light aggregation (hash change = lighting changed)
//! 4. accumulation reset check, hardware light upload
//! 5. tile tracing + accumulation
//! 6. denoise
//! 7. validation, device fault polling

use std::fmt::Write as _;

use crate::accel::{BatchLimits, SoftwareTracer};
use crate::accumulate::{AccumulationBuffer, Denoiser, TileScheduler};
use crate::backend::{
    BackendController, BackendId, BackendState, ControllerConfig, HardwareBackend, ValidationKey,
    Validator,
};
use crate::config::Settings;
use crate::integrator::{Camera, Integrator, IntegratorSettings};
use crate::light::{Light, LightHandle, LightPool};
use crate::scene_lights::{extract_static_lights, LightingMode, SceneLightAggregator};
use crate::util::{Result, Vec3};
use crate::world::World;

/// Build timestamp baked in by the build script.
pub const BUILD_STAMP: &str = env!("HYBRID_PT_BUILD_STAMP");

/// Everything whose change invalidates accumulated samples.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ResetKey {
    width: u32,
    height: u32,
    mode: LightingMode,
    samples_per_pixel: u32,
    max_bounces: u32,
    quality: crate::config::Quality,
    temporal: bool,
    static_lights: bool,
    enabled: bool,
}

impl ResetKey {
    fn new(settings: &Settings, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            mode: settings.mode,
            samples_per_pixel: settings.samples_per_pixel,
            max_bounces: settings.max_bounces,
            quality: settings.quality,
            temporal: settings.temporal,
            static_lights: settings.static_lights,
            enabled: settings.enabled,
        }
    }
}

/// Per-frame bookkeeping returned by [`PathTracer::render_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameStats {
    pub frame: u64,
    pub tiles: usize,
    pub pixels: usize,
    pub visible_lights: usize,
    pub scene_lights: usize,
    pub lights_changed: bool,
    /// Accumulation was cleared before this frame's samples
    pub reset: bool,
    pub hardware: bool,
    /// Tile scheduler completed a full pass this frame
    pub pass_complete: bool,
}

pub struct PathTracer {
    settings: Settings,
    world: Option<World>,
    software: Option<SoftwareTracer>,
    static_lights: Vec<Light>,
    legacy_lights: Vec<Light>,
    pool: LightPool,
    aggregator: SceneLightAggregator,
    controller: BackendController,
    accum: AccumulationBuffer,
    denoiser: Denoiser,
    tiles: TileScheduler,
    validator: Validator,
    /// Latest raw sample per pixel and the frame it was taken in
    current: Vec<Vec3>,
    sampled_frame: Vec<Option<u64>>,
    depth: Vec<f32>,
    normal: Vec<Vec3>,
    output: Vec<Vec3>,
    frame: u64,
    reset_key: Option<ResetKey>,
    visible_lights: usize,
    last_stats: FrameStats,
}

impl std::fmt::Debug for PathTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathTracer")
            .field("world", &self.world.as_ref().map(|w| w.name.as_str()))
            .field("frame", &self.frame)
            .field("backend", &self.controller.state())
            .finish()
    }
}

impl PathTracer {
    pub fn new(settings: Settings, hardware: Option<Box<dyn HardwareBackend>>) -> Self {
        let settings = settings.validated();
        Self {
            tiles: TileScheduler::new(0, 0, settings.tile_size, settings.quality.preset().tiles_per_frame),
            denoiser: Denoiser::new(settings.quality.denoise_settings()),
            validator: Validator::new(settings.validation_stride),
            settings,
            world: None,
            software: None,
            static_lights: Vec::new(),
            legacy_lights: Vec::new(),
            pool: LightPool::default(),
            aggregator: SceneLightAggregator::default(),
            controller: BackendController::new(hardware, BatchLimits::default()),
            accum: AccumulationBuffer::new(0, 0),
            current: Vec::new(),
            sampled_frame: Vec::new(),
            depth: Vec::new(),
            normal: Vec::new(),
            output: Vec::new(),
            frame: 0,
            reset_key: None,
            visible_lights: 0,
            last_stats: FrameStats::default(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings; the next frame picks the changes up.
    pub fn update_settings(&mut self, settings: Settings) {
        let settings = settings.validated();
        let tiles_per_frame = settings.quality.preset().tiles_per_frame;
        if settings.tile_size != self.settings.tile_size {
            let (w, h) = self.accum.dimensions();
            self.tiles = TileScheduler::new(w, h, settings.tile_size, tiles_per_frame);
        } else {
            self.tiles.set_tiles_per_frame(tiles_per_frame);
        }
        self.validator.set_stride(settings.validation_stride);
        self.denoiser.set_settings(settings.quality.denoise_settings());
        self.settings = settings;
    }

    /// Apply one console-style option.
    pub fn apply_setting(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.settings.clone();
        next.apply(key, value)?;
        self.update_settings(next);
        Ok(())
    }

    /// Install a new level: static lights, software tracer, hardware structures.
    #[tracing::instrument(skip_all, fields(world = %world.name))]
    pub fn load_world(&mut self, world: World) {
        let all: Vec<LightHandle> = self.pool.iter().map(|(h, _)| h).collect();
        for h in all {
            self.pool.release(h);
        }
        self.static_lights = extract_static_lights(&world);
        self.software = Some(SoftwareTracer::new(&world));
        self.controller.world_changed(&world);
        tracing::info!(
            surfaces = world.surfaces.len(),
            static_lights = self.static_lights.len(),
            "world loaded"
        );
        self.world = Some(world);
        self.reset_accumulation();
    }

    /// Drop the world and all GPU-side data.
    pub fn shutdown(&mut self) {
        if let Some(hw) = self.controller.hardware_mut() {
            hw.clear();
        }
        self.world = None;
        self.software = None;
        self.static_lights.clear();
        self.legacy_lights.clear();
        self.pool = LightPool::default();
        self.aggregator = SceneLightAggregator::default();
        self.accum = AccumulationBuffer::new(0, 0);
        self.tiles.resize(0, 0);
        self.denoiser.reset();
        self.current.clear();
        self.sampled_frame.clear();
        self.depth.clear();
        self.normal.clear();
        self.output.clear();
        self.reset_key = None;
        tracing::debug!("path tracer shut down");
    }

    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    pub fn lights(&self) -> &LightPool {
        &self.pool
    }

    pub fn lights_mut(&mut self) -> &mut LightPool {
        &mut self.pool
    }

    pub fn static_lights(&self) -> &[Light] {
        &self.static_lights
    }

    /// Legacy point lights, used when no pool light is visible.
    pub fn set_legacy_lights(&mut self, mut lights: Vec<Light>) {
        lights.iter_mut().for_each(Light::clamp_radius);
        self.legacy_lights = lights;
    }

    pub fn aggregator(&self) -> &SceneLightAggregator {
        &self.aggregator
    }

    pub fn controller(&self) -> &BackendController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut BackendController {
        &mut self.controller
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn accumulation(&self) -> &AccumulationBuffer {
        &self.accum
    }

    /// Denoised color, row-major.
    pub fn color(&self) -> &[Vec3] {
        &self.output
    }

    /// Primary hit distance per pixel (`f32::INFINITY` on a miss).
    pub fn depth(&self) -> &[f32] {
        &self.depth
    }

    /// Primary hit normal per pixel (zero on a miss).
    pub fn normal(&self) -> &[Vec3] {
        &self.normal
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn last_stats(&self) -> FrameStats {
        self.last_stats
    }

    pub fn hardware_active(&self) -> bool {
        self.controller.hardware_active()
    }

    pub fn hardware_status(&self) -> String {
        self.controller.status()
    }

    /// Clear accumulated samples, denoise history and tile progress.
    pub fn reset_accumulation(&mut self) {
        self.accum.reset();
        self.denoiser.reset();
        self.tiles.reset();
        self.sampled_frame.fill(None);
        self.current.fill(Vec3::ZERO);
    }

    fn resize(&mut self, width: u32, height: u32) {
        let n = pixel_count(width, height);
        self.accum.resize(width, height);
        self.tiles.resize(width, height);
        self.current = vec![Vec3::ZERO; n];
        self.sampled_frame = vec![None; n];
        self.depth = vec![f32::INFINITY; n];
        self.normal = vec![Vec3::ZERO; n];
        self.output = vec![Vec3::ZERO; n];
    }

    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            preference: self.settings.backend,
            hardware_enabled: self.settings.hardware_enabled,
            trace_enabled: self.settings.enabled,
        }
    }

    /// Render one frame of progressive path tracing.
    pub fn render_frame(&mut self, camera: &Camera, width: u32, height: u32) -> FrameStats {
        let frame = self.frame;
        self.frame += 1;
        let mut stats = FrameStats {
            frame,
            ..Default::default()
        };

        // 1. backend selection
        let config = self.controller_config();
        self.controller.update(config, self.world.as_ref());
        if let Some(world) = &self.world {
            self.controller.ensure_populated(world);
        }
        if (width, height) != self.accum.dimensions()
            || self.output.len() != pixel_count(width, height)
        {
            self.resize(width, height);
        }
        self.accum.set_temporal(self.settings.temporal);

        // 2. culling
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        let frustum = camera.frustum(aspect);
        let visible: Vec<Light> = {
            let pvs = self.world.as_ref().and_then(|w| w.visibility_at(camera.position));
            let handles = self.pool.cull_visible(&frustum, pvs, frame);
            handles.iter().filter_map(|&h| self.pool.get(h).copied()).collect()
        };
        if let Some(world) = &self.world {
            self.pool.refresh_interactions(world, frame);
        }
        self.visible_lights = visible.len();
        stats.visible_lights = visible.len();

        // 3. aggregation
        let mode = if self.settings.enabled {
            self.settings.mode
        } else {
            LightingMode::Off
        };
        let statics: &[Light] = if self.settings.static_lights {
            &self.static_lights
        } else {
            &[]
        };
        let rebuild = self
            .aggregator
            .rebuild(&visible, &self.legacy_lights, statics, mode);
        stats.scene_lights = rebuild.count;
        stats.lights_changed = rebuild.changed;

        // 4. reset triggers, light upload
        let key = ResetKey::new(&self.settings, width, height);
        if self.reset_key != Some(key) || rebuild.changed {
            if self.reset_key.is_some() {
                tracing::debug!(lights_changed = rebuild.changed, "accumulation reset");
            }
            self.reset_key = Some(key);
            self.reset_accumulation();
            stats.reset = true;
        }
        self.controller
            .upload_lights(self.aggregator.lights(), rebuild.changed);

        if !self.settings.enabled {
            self.last_stats = stats;
            return stats;
        }
        let (Some(world), Some(software)) = (&self.world, &self.software) else {
            self.last_stats = stats;
            return stats;
        };

        // 5. tile tracing
        let isettings = IntegratorSettings {
            max_bounces: self.settings.max_bounces,
            samples_per_pixel: self.settings.samples_per_pixel,
            sky_color: self.settings.sky_color,
            seed: self.settings.seed,
        };
        // Tagged with what actually traces: hardware that is selected but
        // not built yet is served by software.
        let traced_by = if self.controller.serves_hardware() {
            BackendId::Hardware
        } else {
            BackendId::Software
        };
        stats.hardware = traced_by == BackendId::Hardware;
        let query = self.controller.ray_query(software);
        let integrator = Integrator::new(query, &world.materials, self.aggregator.lights(), isettings);
        let tiles = self.tiles.next_tiles();
        stats.tiles = tiles.len();
        for tile in &tiles {
            for (x, y) in tile.pixels() {
                let i = y as usize * width as usize + x as usize;
                let sample = integrator.render_pixel(camera, x, y, width, height, frame);
                self.accum.accumulate(x, y, sample.color);
                self.current[i] = sample.color;
                self.sampled_frame[i] = Some(frame);
                self.depth[i] = sample.depth;
                self.normal[i] = sample.normal;
                stats.pixels += 1;
            }
        }
        stats.pass_complete = self.tiles.frame_complete();

        // 6. denoise
        let denoised = self.denoiser.denoise(&self.accum, &self.current);
        self.output.clear();
        self.output.extend_from_slice(denoised);

        // 7. validation
        if self.validator.enabled() {
            let reference = Integrator::new(software, &world.materials, self.aggregator.lights(), isettings);
            let pairs: Vec<(Vec3, Vec3)> = self
                .validator
                .sample_points(width, height)
                .filter_map(|(x, y)| {
                    let i = y as usize * width as usize + x as usize;
                    (self.sampled_frame[i] == Some(frame)).then(|| {
                        let r = reference.render_pixel(camera, x, y, width, height, frame);
                        (self.current[i], r.color)
                    })
                })
                .collect();
            let key = ValidationKey {
                backend: traced_by,
                map: &world.name,
                width,
                height,
                frame,
                content_hash: rebuild.hash,
            };
            self.validator.validate(key, pairs);
        }

        self.controller.poll_faults();
        self.last_stats = stats;
        stats
    }

    /// Multi-line human readable status.
    pub fn status_report(&self) -> String {
        let mut s = String::new();
        let (w, h) = self.accum.dimensions();
        let _ = writeln!(s, "path tracing: {}", if self.settings.enabled { "enabled" } else { "disabled" });
        let _ = writeln!(s, "backend: {}", self.controller.status());
        let _ = writeln!(
            s,
            "lights: {} pool ({} visible), {} static, {} aggregated ({} dynamic)",
            self.pool.len(),
            self.visible_lights,
            self.static_lights.len(),
            self.aggregator.lights().len(),
            self.aggregator.dynamic_count(),
        );
        let _ = writeln!(s, "mode: {}  quality: {}", self.settings.mode, self.settings.quality);
        let _ = writeln!(
            s,
            "bounces: {}  spp: {}",
            self.settings.max_bounces, self.settings.samples_per_pixel
        );
        let _ = writeln!(
            s,
            "temporal: {} ({w}x{h}, min samples {})",
            if self.settings.temporal { "on" } else { "off" },
            self.accum.min_count()
        );
        for backend in [BackendId::Software, BackendId::Hardware] {
            if let Some(r) = self.validator.record(backend) {
                let _ = writeln!(
                    s,
                    "validation {backend}: frame {} rmse {:.5} max {:.5} ({} px)",
                    r.frame, r.rmse, r.max_error, r.samples
                );
            }
        }
        if let Some(p) = self.validator.last_parity() {
            let _ = writeln!(
                s,
                "parity delta: {:.5}{}",
                p.delta,
                if p.regression { " (REGRESSION)" } else { "" }
            );
        }
        let _ = write!(s, "build: {BUILD_STAMP}");
        s
    }

    pub fn backend_state(&self) -> BackendState {
        self.controller.state()
    }
}

/// Pixel count in `usize`; the product of two `u32` can wrap in `u32`.
#[inline]
fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EmulatedHardware;
    use crate::world::{Material, WorldBuilder};

    fn room() -> World {
        let mut b = WorldBuilder::new("test_room").entities(
            r#"{ "classname" "worldspawn" }
{ "classname" "light" "origin" "4 4 7" "light" "30" "radius" "20" }"#,
        );
        let m = b.add_material(Material::default());
        b.add_room(Vec3::ZERO, Vec3::splat(8.0), m);
        b.build()
    }

    fn camera() -> Camera {
        Camera::look_at(Vec3::new(4.0, 1.0, 4.0), Vec3::new(4.0, 7.0, 3.0), Vec3::Z)
    }

    fn tracer(settings: Settings) -> PathTracer {
        let mut pt = PathTracer::new(settings, None);
        pt.load_world(room());
        pt
    }

    #[test]
    fn test_frame_produces_output() {
        let mut pt = tracer(Settings::default());
        let stats = pt.render_frame(&camera(), 16, 12);
        assert!(stats.reset);
        assert_eq!(stats.scene_lights, 1);
        assert_eq!(pt.color().len(), 16 * 12);
        assert!(pt.color().iter().any(|c| c.max_element() > 0.0));
        assert!(pt.depth().iter().all(|d| d.is_finite()), "closed room: every ray hits");
        assert_eq!(pt.accumulation().min_count(), 1);

        let stats = pt.render_frame(&camera(), 16, 12);
        assert!(!stats.reset);
        assert_eq!(pt.accumulation().min_count(), 2);
    }

    #[test]
    fn test_resolution_change_resets() {
        let mut pt = tracer(Settings::default());
        pt.render_frame(&camera(), 8, 8);
        pt.render_frame(&camera(), 8, 8);
        let stats = pt.render_frame(&camera(), 10, 8);
        assert!(stats.reset);
        assert_eq!(pt.accumulation().min_count(), 1);
    }

    #[test]
    fn test_setting_change_resets() {
        let mut pt = tracer(Settings::default());
        pt.render_frame(&camera(), 8, 8);
        pt.apply_setting("spp", "2").unwrap();
        assert!(pt.render_frame(&camera(), 8, 8).reset);
        pt.apply_setting("validation_stride", "4").unwrap();
        assert!(!pt.render_frame(&camera(), 8, 8).reset, "validation does not invalidate samples");
    }

    #[test]
    fn test_off_mode_has_no_scene_lights() {
        let mut s = Settings::default();
        s.mode = LightingMode::Off;
        let mut pt = tracer(s);
        let stats = pt.render_frame(&camera(), 8, 8);
        assert_eq!(stats.scene_lights, 0);
    }

    #[test]
    fn test_hardware_selected_and_validated() {
        let mut s = Settings::default();
        s.validation_stride = 2;
        let mut pt = PathTracer::new(s, Some(Box::new(EmulatedHardware::new())));
        pt.load_world(room());
        let stats = pt.render_frame(&camera(), 8, 8);
        assert!(stats.hardware);
        assert!(pt.hardware_active());
        let rec = pt.validator().record(BackendId::Hardware).unwrap();
        assert_eq!(rec.samples, 16);
        assert!(rec.rmse < 1e-3, "emulated hardware matches software, rmse {}", rec.rmse);
        assert!(pt.status_report().contains("validation hardware"));
    }

    #[test]
    fn test_disabled_traces_nothing() {
        let mut s = Settings::default();
        s.enabled = false;
        let mut pt = tracer(s);
        let stats = pt.render_frame(&camera(), 8, 8);
        assert_eq!(stats.pixels, 0);
        assert!(pt.status_report().contains("disabled"));
    }

    #[test]
    fn test_shutdown_clears() {
        let mut pt = tracer(Settings::default());
        pt.render_frame(&camera(), 8, 8);
        pt.shutdown();
        assert!(pt.world().is_none());
        assert!(pt.color().is_empty());
        let stats = pt.render_frame(&camera(), 8, 8);
        assert_eq!(stats.pixels, 0);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_pixel_count_does_not_wrap() {
        // 65536 * 65536 wraps to zero in u32
        assert_eq!(65536u32.wrapping_mul(65536), 0);
        assert_eq!(pixel_count(65536, 65536), 1usize << 32);
        assert_eq!(pixel_count(u32::MAX, 2), 2 * u32::MAX as usize);
    }
}
