//! Hardware vs software selection.
//!
//! ```text
//!                 config change
//!   ┌──────────────────────────────────────────┐
//!   │   hardware requested? ── no ──► SoftwareActive
//!   │          │ yes
//!   │   backend present + probe OK + populate OK ──► HardwareActive
//!   │          │ otherwise                               │ runtime fault
//!   │          ▼                                         ▼
//!   └──────── Unavailable (serves software) ◄────────────┘
//! ```
//!
//! Every call site asks [`BackendController::ray_query`] / [`BackendController::state`]
//! instead of probing capability itself. Failures are logged once per
//! distinct cause; the log memory is cleared whenever the relevant
//! configuration changes.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::hardware::{HardwareBackend, Instance};
use crate::accel::{AccelBuilder, BatchLimits, BuildSummary, RayQuery, SoftwareTracer};
use crate::scene_lights::SceneLight;
use crate::util::{Error, Result};
use crate::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendState {
    SoftwareActive,
    HardwareActive,
    /// Hardware was requested but failed; software serves the frames
    Unavailable,
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SoftwareActive => "software",
            Self::HardwareActive => "hardware",
            Self::Unavailable => "unavailable (software fallback)",
        })
    }
}

/// User backend preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Hardware,
    Software,
}

impl FromStr for BackendPreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "hardware" | "hw" | "gpu" => Ok(Self::Hardware),
            "software" | "sw" | "cpu" => Ok(Self::Software),
            other => Err(Error::setting("backend", other)),
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Hardware => "hardware",
            Self::Software => "software",
        })
    }
}

/// Settings the controller reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub preference: BackendPreference,
    pub hardware_enabled: bool,
    pub trace_enabled: bool,
}

pub struct BackendController {
    state: BackendState,
    config: Option<ControllerConfig>,
    hardware: Option<Box<dyn HardwareBackend>>,
    builder: AccelBuilder,
    populated: bool,
    light_buffer_dirty: bool,
    reported: HashSet<String>,
    last_error: Option<String>,
    last_build: Option<BuildSummary>,
}

impl fmt::Debug for BackendController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendController")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("hardware", &self.hardware.as_ref().map(|h| h.name().to_owned()))
            .field("populated", &self.populated)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl BackendController {
    pub fn new(hardware: Option<Box<dyn HardwareBackend>>, limits: BatchLimits) -> Self {
        Self {
            state: BackendState::SoftwareActive,
            config: None,
            hardware,
            builder: AccelBuilder::new(limits),
            populated: false,
            light_buffer_dirty: true,
            reported: HashSet::new(),
            last_error: None,
            last_build: None,
        }
    }

    #[inline]
    pub fn state(&self) -> BackendState {
        self.state
    }

    #[inline]
    pub fn hardware_active(&self) -> bool {
        self.state == BackendState::HardwareActive
    }

    pub fn has_hardware(&self) -> bool {
        self.hardware.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_build(&self) -> Option<BuildSummary> {
        self.last_build
    }

    pub fn light_buffer_dirty(&self) -> bool {
        self.light_buffer_dirty
    }

    pub fn hardware(&self) -> Option<&dyn HardwareBackend> {
        self.hardware.as_deref()
    }

    pub fn hardware_mut(&mut self) -> Option<&mut (dyn HardwareBackend + 'static)> {
        self.hardware.as_deref_mut()
    }

    /// One-line status for diagnostics.
    pub fn status(&self) -> String {
        let device = self.hardware.as_ref().map_or("none", |h| h.name());
        match &self.last_error {
            Some(err) if self.state == BackendState::Unavailable => {
                format!("{} [device: {device}] ({err})", self.state)
            }
            _ => format!("{} [device: {device}]", self.state),
        }
    }

    /// A new world was loaded: hardware structures must be rebuilt.
    pub fn world_changed(&mut self, world: &World) {
        self.populated = false;
        if self.state == BackendState::HardwareActive {
            if let Err(err) = self.populate(world) {
                self.fail(err);
            }
        }
    }

    /// Re-evaluate the state when the configuration differs from the last
    /// evaluated one. Returns the current state.
    pub fn update(&mut self, config: ControllerConfig, world: Option<&World>) -> BackendState {
        if self.config == Some(config) {
            return self.state;
        }
        self.config = Some(config);
        self.reported.clear();
        self.last_error = None;

        let previous = self.state;
        self.state = self.evaluate(config, world);
        if self.state != previous {
            tracing::info!(from = %previous, to = %self.state, "ray tracing backend changed");
        }
        self.state
    }

    fn evaluate(&mut self, config: ControllerConfig, world: Option<&World>) -> BackendState {
        let requested = config.trace_enabled
            && config.hardware_enabled
            && match config.preference {
                BackendPreference::Hardware => true,
                BackendPreference::Auto => self.hardware.is_some(),
                BackendPreference::Software => false,
            };
        if !requested {
            return BackendState::SoftwareActive;
        }

        let Some(hw) = self.hardware.as_mut() else {
            self.report(Error::HardwareUnavailable("no hardware backend present".into()));
            return BackendState::Unavailable;
        };
        if let Err(err) = hw.probe() {
            self.report(err);
            return BackendState::Unavailable;
        }
        if let Some(world) = world {
            if !self.populated {
                if let Err(err) = self.populate(world) {
                    self.report(err);
                    return BackendState::Unavailable;
                }
            }
        }
        self.light_buffer_dirty = true;
        BackendState::HardwareActive
    }

    /// Build BLAS per batch and one identity-instanced TLAS.
    fn populate(&mut self, world: &World) -> Result<()> {
        let Some(hw) = self.hardware.as_mut() else {
            return Err(Error::HardwareUnavailable("no hardware backend present".into()));
        };
        hw.clear();
        let out = self.builder.build_world(world);
        let mut instances = Vec::with_capacity(out.batches.len());
        for batch in &out.batches {
            instances.push(Instance::identity(hw.build_blas(batch)?));
        }
        hw.build_tlas(&instances)?;

        tracing::info!(
            triangles = out.summary.triangles_built,
            batches = out.summary.batches_built,
            skipped = out.summary.surfaces_skipped,
            "hardware world populated"
        );
        self.last_build = Some(out.summary);
        self.populated = true;
        self.light_buffer_dirty = true;
        Ok(())
    }

    /// Ensure structures exist for the current world (first frame after a
    /// load while hardware is active).
    pub fn ensure_populated(&mut self, world: &World) {
        if self.state != BackendState::HardwareActive || self.populated {
            return;
        }
        if let Err(err) = self.populate(world) {
            self.fail(err);
        }
    }

    /// Runtime hardware failure: software for the rest of the session
    /// (until the configuration changes).
    pub fn fail(&mut self, err: Error) {
        self.report(err);
        if self.state != BackendState::Unavailable {
            tracing::info!(from = %self.state, "falling back to software tracing");
        }
        self.state = BackendState::Unavailable;
        self.populated = false;
    }

    /// Collect faults raised by the device during the last frame.
    pub fn poll_faults(&mut self) {
        if self.state != BackendState::HardwareActive {
            return;
        }
        if let Some(err) = self.hardware.as_mut().and_then(|h| h.take_fault()) {
            self.fail(err);
        }
    }

    /// Push the scene lights to the device when they changed or the buffer
    /// was invalidated.
    pub fn upload_lights(&mut self, lights: &[SceneLight], changed: bool) {
        if self.state != BackendState::HardwareActive || !(changed || self.light_buffer_dirty) {
            return;
        }
        let Some(hw) = self.hardware.as_mut() else { return };
        match hw.upload_lights(lights) {
            Ok(()) => self.light_buffer_dirty = false,
            Err(err) => self.fail(err),
        }
    }

    /// Hardware is selected and its structures can answer queries.
    pub fn serves_hardware(&self) -> bool {
        self.state == BackendState::HardwareActive
            && self.hardware.as_ref().is_some_and(|hw| hw.is_ready())
    }

    /// Ray query serving this frame.
    pub fn ray_query<'a>(&'a self, software: &'a SoftwareTracer) -> &'a dyn RayQuery {
        match &self.hardware {
            Some(hw) if self.serves_hardware() => hw.as_ray_query(),
            _ => software,
        }
    }

    fn report(&mut self, err: Error) {
        let cause = err.to_string();
        if self.reported.insert(cause.clone()) {
            tracing::warn!("hardware ray tracing unavailable: {cause}");
        }
        self.last_error = Some(cause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EmulatedHardware;
    use crate::util::Vec3;
    use crate::world::{Material, WorldBuilder};

    fn world() -> World {
        let mut b = WorldBuilder::new("w");
        let m = b.add_material(Material::default());
        b.add_room(Vec3::ZERO, Vec3::splat(4.0), m);
        b.build()
    }

    fn config(preference: BackendPreference) -> ControllerConfig {
        ControllerConfig {
            preference,
            hardware_enabled: true,
            trace_enabled: true,
        }
    }

    fn controller(hw: Option<EmulatedHardware>) -> BackendController {
        BackendController::new(
            hw.map(|h| Box::new(h) as Box<dyn HardwareBackend>),
            BatchLimits::default(),
        )
    }

    #[test]
    fn test_auto_with_hardware_activates_and_populates() {
        let w = world();
        let mut c = controller(Some(EmulatedHardware::new()));
        assert_eq!(c.update(config(BackendPreference::Auto), Some(&w)), BackendState::HardwareActive);
        assert!(c.hardware_active());
        assert!(c.light_buffer_dirty());
        assert_eq!(c.last_build().unwrap().triangles_built, 12);

        let sw = SoftwareTracer::new(&w);
        assert_eq!(c.ray_query(&sw).backend_name(), "emulated-hardware");

        c.upload_lights(&[], false);
        assert!(!c.light_buffer_dirty());
    }

    #[test]
    fn test_auto_without_hardware_is_software() {
        let mut c = controller(None);
        assert_eq!(c.update(config(BackendPreference::Auto), None), BackendState::SoftwareActive);
        assert_eq!(c.update(config(BackendPreference::Hardware), None), BackendState::Unavailable);
        assert!(c.last_error().unwrap().contains("no hardware"));
    }

    #[test]
    fn test_probe_failure_falls_back() {
        let w = world();
        let mut c = controller(Some(EmulatedHardware::new().with_probe_failure("no ray query")));
        assert_eq!(c.update(config(BackendPreference::Hardware), Some(&w)), BackendState::Unavailable);
        let sw = SoftwareTracer::new(&w);
        assert_eq!(c.ray_query(&sw).backend_name(), "software-bsp");
        assert!(c.status().contains("no ray query"));
    }

    #[test]
    fn test_build_failure_falls_back() {
        let w = world();
        let mut c = controller(Some(EmulatedHardware::new().with_build_failure("oom")));
        assert_eq!(c.update(config(BackendPreference::Auto), Some(&w)), BackendState::Unavailable);
    }

    #[test]
    fn test_software_preference_and_trace_disabled() {
        let mut c = controller(Some(EmulatedHardware::new()));
        assert_eq!(c.update(config(BackendPreference::Software), None), BackendState::SoftwareActive);
        let off = ControllerConfig {
            trace_enabled: false,
            ..config(BackendPreference::Hardware)
        };
        assert_eq!(c.update(off, None), BackendState::SoftwareActive);
        let hw_off = ControllerConfig {
            hardware_enabled: false,
            ..config(BackendPreference::Hardware)
        };
        assert_eq!(c.update(hw_off, None), BackendState::SoftwareActive);
    }

    #[test]
    fn test_runtime_fault_until_config_change() {
        let w = world();
        let mut c = controller(Some(EmulatedHardware::new()));
        c.update(config(BackendPreference::Auto), Some(&w));
        assert!(c.hardware_active());

        // Emulated device loses itself mid-session
        c.fail(Error::TraceFailed("device lost".into()));
        assert_eq!(c.state(), BackendState::Unavailable);
        // Same config: no re-evaluation
        assert_eq!(c.update(config(BackendPreference::Auto), Some(&w)), BackendState::Unavailable);
        // Any relevant change re-evaluates
        c.update(config(BackendPreference::Software), Some(&w));
        assert_eq!(c.update(config(BackendPreference::Auto), Some(&w)), BackendState::HardwareActive);
        assert!(c.last_error().is_none());
    }

    #[test]
    fn test_world_change_repopulates() {
        let w = world();
        let mut c = controller(Some(EmulatedHardware::new()));
        c.update(config(BackendPreference::Auto), None);
        assert!(c.hardware_active());
        let sw = SoftwareTracer::new(&w);
        // Nothing built yet: software serves
        assert_eq!(c.ray_query(&sw).backend_name(), "software-bsp");

        c.ensure_populated(&w);
        assert_eq!(c.ray_query(&sw).backend_name(), "emulated-hardware");

        c.world_changed(&World::default());
        assert!(c.hardware_active());
        assert_eq!(c.last_build().unwrap().triangles_built, 0);
    }
}
