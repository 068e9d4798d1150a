//! Renderable lights: the fixed-capacity pool, its interaction arena and the
//! per-frame visibility culler.

mod pool;

pub use pool::{Interaction, InteractionArena, LightHandle, LightPool};

use crate::util::{Aabb, Vec3};

/// Lower radius clamp, keeps `1 - d/r` well conditioned.
pub const MIN_LIGHT_RADIUS: f32 = 1.0;
/// Upper radius clamp for point and spot lights.
pub const MAX_LIGHT_RADIUS: f32 = 16384.0;

/// Default pool capacity.
pub const DEFAULT_MAX_LIGHTS: usize = 1024;
/// Default interaction arena capacity.
pub const DEFAULT_MAX_INTERACTIONS: usize = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LightKind {
    Point = 0,
    Spot = 1,
    Directional = 2,
}

/// Renderable light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub origin: Vec3,
    /// Direction the light shines toward (spot / directional)
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    /// Influence radius; ignored for directional lights
    pub radius: f32,
    /// Cosine of the spot cone half-angle
    pub spot_cos: f32,
    pub casts_shadows: bool,
    /// Persists for the level's lifetime instead of one frame
    pub is_static: bool,
    /// PVS cluster the light sits in, if known
    pub area: Option<u32>,
}

impl Light {
    pub fn point(origin: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            kind: LightKind::Point,
            origin,
            direction: Vec3::NEG_Z,
            color,
            intensity,
            radius,
            spot_cos: -1.0,
            casts_shadows: true,
            is_static: false,
            area: None,
        }
    }

    pub fn spot(origin: Vec3, direction: Vec3, cone_deg: f32, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            kind: LightKind::Spot,
            direction: direction.normalize_or(Vec3::NEG_Z),
            spot_cos: cone_deg.to_radians().cos(),
            ..Self::point(origin, color, intensity, radius)
        }
    }

    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            direction: direction.normalize_or(Vec3::NEG_Z),
            ..Self::point(Vec3::ZERO, color, intensity, MAX_LIGHT_RADIUS)
        }
    }

    pub fn with_shadows(mut self, casts_shadows: bool) -> Self {
        self.casts_shadows = casts_shadows;
        self
    }

    pub fn with_area(mut self, area: Option<u32>) -> Self {
        self.area = area;
        self
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    /// Clamp radius into `[MIN_LIGHT_RADIUS, MAX_LIGHT_RADIUS]`. NaN becomes the minimum.
    pub fn clamp_radius(&mut self) {
        self.radius = if self.radius.is_nan() {
            MIN_LIGHT_RADIUS
        } else {
            self.radius.clamp(MIN_LIGHT_RADIUS, MAX_LIGHT_RADIUS)
        };
    }

    #[inline]
    pub fn is_directional(&self) -> bool {
        self.kind == LightKind::Directional
    }

    /// Bounding box of the light's sphere of influence.
    pub fn bounds(&self) -> Aabb {
        Aabb::from_sphere(self.origin, self.radius)
    }
}
