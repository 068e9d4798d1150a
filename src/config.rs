//! Path tracer settings.
//!
//! Persisted as JSON; every field has a default so older files keep loading.
//! Console-style `key value` edits go through [`Settings::apply`].

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::accumulate::DenoiseSettings;
use crate::backend::BackendPreference;
use crate::integrator::MAX_BOUNCES_LIMIT;
use crate::scene_lights::LightingMode;
use crate::util::{Error, Result, Vec3};

const MAX_SAMPLES_PER_PIXEL: u32 = 64;

/// Quality preset: tile budget and spatial filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Off,
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

/// What a quality level expands to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityPreset {
    /// Tiles traced per frame, 0 = all
    pub tiles_per_frame: u32,
    pub spatial_filter: bool,
    pub filter_radius: u32,
    pub min_alpha: f32,
}

impl Quality {
    pub fn preset(self) -> QualityPreset {
        let (tiles_per_frame, spatial_filter, filter_radius, min_alpha) = match self {
            Self::Off => (0, false, 0, 1.0),
            Self::Low => (16, true, 1, 0.1),
            Self::Medium => (32, true, 2, 0.05),
            Self::High => (64, true, 2, 0.02),
            Self::Ultra => (0, true, 3, 0.01),
        };
        QualityPreset {
            tiles_per_frame,
            spatial_filter,
            filter_radius,
            min_alpha,
        }
    }

    pub fn denoise_settings(self) -> DenoiseSettings {
        let p = self.preset();
        DenoiseSettings {
            min_alpha: p.min_alpha,
            spatial: p.spatial_filter,
            radius: p.filter_radius,
            ..Default::default()
        }
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(Self::Off),
            "low" | "1" => Ok(Self::Low),
            "medium" | "2" => Ok(Self::Medium),
            "high" | "3" => Ok(Self::High),
            "ultra" | "4" => Ok(Self::Ultra),
            other => Err(Error::setting("quality", other)),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Ultra => "ultra",
        })
    }
}

/// Path tracer settings that persist between sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Tracing
    pub enabled: bool,
    pub mode: LightingMode,
    pub quality: Quality,
    pub max_bounces: u32,
    pub samples_per_pixel: u32,
    pub temporal: bool,
    pub static_lights: bool,

    // Backend
    pub backend: BackendPreference,
    pub hardware_enabled: bool,
    /// Validate every Nth pixel against software, 0 = off
    pub validation_stride: u32,

    // Sampling / output
    pub seed: u64,
    pub tile_size: u32,
    pub sky_color: Vec3,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: LightingMode::All,
            quality: Quality::Medium,
            max_bounces: 2,
            samples_per_pixel: 1,
            temporal: true,
            static_lights: true,
            backend: BackendPreference::Auto,
            hardware_enabled: true,
            validation_stride: 0,
            seed: 0x5eed,
            tile_size: 16,
            sky_color: Vec3::new(0.05, 0.06, 0.08),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(Error::setting(key, value)),
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::setting(key, value))
}

impl Settings {
    /// Load settings from a JSON file and clamp out-of-range values.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&text)?;
        Ok(settings.validated())
    }

    /// Save settings as pretty JSON.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Clamp counts into their supported ranges.
    pub fn validated(mut self) -> Self {
        self.max_bounces = self.max_bounces.min(MAX_BOUNCES_LIMIT);
        self.samples_per_pixel = self.samples_per_pixel.clamp(1, MAX_SAMPLES_PER_PIXEL);
        self.tile_size = self.tile_size.clamp(4, 256);
        if !self.sky_color.is_finite() {
            self.sky_color = Self::default().sky_color;
        }
        self.sky_color = self.sky_color.max(Vec3::ZERO);
        self
    }

    /// Apply one console-style option. Unknown keys and unparsable values
    /// are rejected without changing anything.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        match key.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "enabled" | "enable" | "trace" => next.enabled = parse_bool(key, value)?,
            "mode" => next.mode = value.parse()?,
            "quality" => next.quality = value.parse()?,
            "max_bounces" | "bounces" => next.max_bounces = parse_num(key, value)?,
            "samples_per_pixel" | "spp" => next.samples_per_pixel = parse_num(key, value)?,
            "temporal" => next.temporal = parse_bool(key, value)?,
            "static_lights" => next.static_lights = parse_bool(key, value)?,
            "backend" => next.backend = value.parse()?,
            "hardware" | "hardware_enabled" => next.hardware_enabled = parse_bool(key, value)?,
            "validation_stride" | "validate" => next.validation_stride = parse_num(key, value)?,
            "seed" => next.seed = parse_num(key, value)?,
            "tile_size" => next.tile_size = parse_num(key, value)?,
            _ => return Err(Error::setting(key, value)),
        }
        *self = next.validated();
        Ok(())
    }
}
