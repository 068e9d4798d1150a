//! Backend-agnostic scene light records.
//!
//! Dynamic lights (visible pool lights, or legacy point lights when none are
//! visible) and static lights extracted from the world's entity text are
//! merged into one capped array of [`SceneLight`]s. The array is uploaded
//! as-is to the hardware light buffer and hashed to detect lighting changes.

mod aggregate;
mod entities;

pub use aggregate::{RebuildResult, SceneLightAggregator};
pub use entities::{extract_static_lights, parse_entities, parse_entities_lossy, Entity};

use std::fmt;
use std::str::FromStr;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::light::{Light, LightKind};
use crate::util::{Error, Vec3};

/// Maximum aggregated lights.
pub const MAX_SCENE_LIGHTS: usize = 256;

/// Radius stored for directional lights.
pub const INFINITE_LIGHT_RADIUS: f32 = 1.0e6;

/// Which light sources take part in path tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightingMode {
    Off,
    #[serde(rename = "dynamic")]
    DynamicOnly,
    #[default]
    All,
}

impl FromStr for LightingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(Self::Off),
            "dynamic" | "dynamic-only" | "dynamic_only" | "1" => Ok(Self::DynamicOnly),
            "all" | "2" => Ok(Self::All),
            other => Err(Error::setting("mode", other)),
        }
    }
}

impl fmt::Display for LightingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::DynamicOnly => "dynamic",
            Self::All => "all",
        })
    }
}

/// GPU-layout light record (64 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneLight {
    pub origin: [f32; 3],
    pub radius: f32,
    pub color: [f32; 3],
    pub intensity: f32,
    pub direction: [f32; 3],
    pub spot_cos: f32,
    /// [`LightKind`] discriminant
    pub kind: u32,
    pub casts_shadows: u32,
    pub is_static: u32,
    pub _pad: u32,
}

impl SceneLight {
    /// Normalize a pool light. Unset intensity is back-filled from the color
    /// and directional lights get [`INFINITE_LIGHT_RADIUS`].
    pub fn from_light(light: &Light) -> Self {
        let intensity = if light.intensity > 0.0 {
            light.intensity
        } else {
            (light.color.x + light.color.y + light.color.z) / 3.0
        };
        let radius = match light.kind {
            LightKind::Directional => INFINITE_LIGHT_RADIUS,
            _ => light.radius,
        };
        Self {
            origin: light.origin.to_array(),
            radius,
            color: light.color.to_array(),
            intensity,
            direction: light.direction.to_array(),
            spot_cos: light.spot_cos,
            kind: light.kind as u32,
            casts_shadows: light.casts_shadows as u32,
            is_static: light.is_static as u32,
            _pad: 0,
        }
    }

    #[inline]
    pub fn origin(&self) -> Vec3 {
        Vec3::from_array(self.origin)
    }

    #[inline]
    pub fn color(&self) -> Vec3 {
        Vec3::from_array(self.color)
    }

    #[inline]
    pub fn direction(&self) -> Vec3 {
        Vec3::from_array(self.direction)
    }

    pub fn kind(&self) -> LightKind {
        match self.kind {
            1 => LightKind::Spot,
            2 => LightKind::Directional,
            _ => LightKind::Point,
        }
    }

    #[inline]
    pub fn casts_shadows(&self) -> bool {
        self.casts_shadows != 0
    }
}
