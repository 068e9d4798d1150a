//! # hybrid-pt
//!
//! Real-time hybrid path tracing core for BSP-structured worlds.
//!
//! The crate turns a world (BSP tree, surfaces, PVS, entity lump) and a
//! dynamic light pool into progressively refined radiance. Rays are answered
//! either by the software BSP/BVH tracer or by a hardware ray tracing backend
//! behind the same [`accel::RayQuery`] seam; a validator cross-checks the two.
//!
//! ## Modules
//!
//! - [`util`] - Errors, rays, boxes, frusta
//! - [`world`] - BSP world, surfaces, PVS and a builder
//! - [`light`] - Light pool with generational handles and surface interactions
//! - [`accel`] - Intersection, BVH, software traversal, mesh batching
//! - [`scene_lights`] - Per-frame light aggregation and static light extraction
//! - [`integrator`] - Camera, BRDF and the path integrator
//! - [`accumulate`] - Temporal accumulation, denoise, tile scheduling
//! - [`backend`] - Hardware seam, backend selection, validation
//! - [`config`] - Persisted settings and quality presets
//! - [`context`] - [`PathTracer`], the per-frame pipeline
//!
//! ## Example
//!
//! ```ignore
//! use hybrid_pt::prelude::*;
//!
//! let mut pt = PathTracer::new(Settings::default(), None);
//! pt.load_world(world);
//! pt.lights_mut().allocate(Light::point(origin, Vec3::ONE, 2.0, 300.0));
//! let stats = pt.render_frame(&camera, 640, 360);
//! let pixels = pt.color();
//! ```

pub mod util;
pub mod world;
pub mod light;
pub mod accel;
pub mod scene_lights;
pub mod integrator;
pub mod accumulate;
pub mod backend;
pub mod config;
pub mod context;

// Re-export commonly used types
pub use config::Settings;
pub use context::{FrameStats, PathTracer};
pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::accel::{Hit, RayQuery, SoftwareTracer};
    pub use crate::backend::{BackendPreference, BackendState, EmulatedHardware, HardwareBackend};
    pub use crate::config::{Quality, Settings};
    pub use crate::context::{FrameStats, PathTracer};
    pub use crate::integrator::Camera;
    pub use crate::light::{Light, LightHandle, LightKind, LightPool};
    pub use crate::scene_lights::LightingMode;
    pub use crate::util::{Error, Result, Vec3};
    pub use crate::world::{Material, MaterialId, World, WorldBuilder};
}
