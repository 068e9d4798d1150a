//! Path-tracing integrator.
//!
//! Radiance along a ray is the hit's emission plus next-event estimation over
//! the aggregated scene lights plus one cosine-sampled indirect bounce,
//! evaluated recursively up to `max_bounces`. Russian roulette terminates
//! paths early once they are `RUSSIAN_ROULETTE_DEPTH` bounces deep. Every
//! sample is sanitized so a NaN or infinity anywhere contributes zero.
//!
//! The integrator borrows everything it needs for one frame and owns no
//! mutable state; randomness comes exclusively from the caller's generator.

pub mod brdf;
mod camera;
pub mod sampling;

pub use camera::Camera;
pub use sampling::{cosine_hemisphere, pixel_rng};

use rand::rngs::SmallRng;
use rand::Rng;
use smallvec::SmallVec;

use crate::accel::{Hit, RayQuery};
use crate::light::LightKind;
use crate::scene_lights::SceneLight;
use crate::util::{sanitize, Ray, Vec2, Vec3, EPSILON, RAY_OFFSET};
use crate::world::Material;

/// Bounce depth after which Russian roulette applies.
pub const RUSSIAN_ROULETTE_DEPTH: u32 = 3;
/// Fixed path survival probability under Russian roulette.
pub const RUSSIAN_ROULETTE_SURVIVAL: f32 = 0.8;
/// Shadow ray length for directional lights.
pub const DIRECTIONAL_SHADOW_DISTANCE: f32 = 65536.0;
/// Hard cap on configurable bounce depth.
pub const MAX_BOUNCES_LIMIT: u32 = 16;

/// Per-frame integrator parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegratorSettings {
    pub max_bounces: u32,
    pub samples_per_pixel: u32,
    /// Radiance returned by rays that leave the world
    pub sky_color: Vec3,
    pub seed: u64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            max_bounces: 2,
            samples_per_pixel: 1,
            sky_color: Vec3::new(0.05, 0.06, 0.08),
            seed: 0x5eed,
        }
    }
}

/// One pixel's result: averaged radiance plus primary-hit AOVs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelSample {
    pub color: Vec3,
    /// Primary hit distance, `f32::INFINITY` on a miss
    pub depth: f32,
    /// Primary hit shading normal, zero on a miss
    pub normal: Vec3,
}

/// Light candidate gathered before the shadow batch is resolved.
struct DirectCandidate {
    light: usize,
    to_light: Vec3,
    attenuation: f32,
    /// Index into the shadow ray batch
    shadow: Option<usize>,
}

pub struct Integrator<'a> {
    query: &'a dyn RayQuery,
    materials: &'a [Material],
    lights: &'a [SceneLight],
    settings: IntegratorSettings,
}

impl<'a> Integrator<'a> {
    pub fn new(
        query: &'a dyn RayQuery,
        materials: &'a [Material],
        lights: &'a [SceneLight],
        mut settings: IntegratorSettings,
    ) -> Self {
        settings.max_bounces = settings.max_bounces.min(MAX_BOUNCES_LIMIT);
        settings.samples_per_pixel = settings.samples_per_pixel.max(1);
        Self {
            query,
            materials,
            lights,
            settings,
        }
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &str {
        self.query.backend_name()
    }

    fn material(&self, hit: &Hit) -> Material {
        self.materials
            .get(hit.material.0 as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Radiance arriving along `ray`.
    pub fn trace_path(&self, ray: &Ray, depth: u32, rng: &mut SmallRng) -> Vec3 {
        let Some(hit) = self.query.closest_hit(ray) else {
            return self.settings.sky_color;
        };
        self.shade(&hit, -ray.direction, depth, rng)
    }

    fn shade(&self, hit: &Hit, wo: Vec3, depth: u32, rng: &mut SmallRng) -> Vec3 {
        let emission = self.material(hit).emission;
        let direct = self.evaluate_direct_lighting(hit, wo);
        let indirect = self.evaluate_indirect_lighting(hit, wo, depth, rng);
        sanitize(emission + direct + indirect)
    }

    /// Next-event estimation over every scene light. All shadow rays of
    /// shadow-casting lights go to the ray query as one batch.
    pub fn evaluate_direct_lighting(&self, hit: &Hit, wo: Vec3) -> Vec3 {
        if self.lights.is_empty() {
            return Vec3::ZERO;
        }
        let n = hit.normal;
        let origin = hit.position + hit.geometric_normal * RAY_OFFSET;

        let mut candidates: SmallVec<[DirectCandidate; 16]> = SmallVec::new();
        let mut shadow_rays: SmallVec<[Ray; 16]> = SmallVec::new();

        for (i, light) in self.lights.iter().enumerate() {
            let (to_light, distance, attenuation) = match light.kind() {
                LightKind::Directional => {
                    let l = (-light.direction()).normalize_or_zero();
                    (l, DIRECTIONAL_SHADOW_DISTANCE, 1.0)
                }
                kind => {
                    let delta = light.origin() - hit.position;
                    let distance = delta.length();
                    if distance < EPSILON || distance >= light.radius {
                        continue;
                    }
                    let l = delta / distance;
                    if kind == LightKind::Spot && (-l).dot(light.direction()) < light.spot_cos {
                        continue;
                    }
                    let falloff = 1.0 - distance / light.radius;
                    (l, distance, falloff * falloff)
                }
            };
            if to_light == Vec3::ZERO || n.dot(to_light) <= 0.0 || attenuation <= 0.0 {
                continue;
            }

            let shadow = light.casts_shadows().then(|| {
                shadow_rays.push(
                    Ray::new(origin, to_light).with_range(0.0, (distance - 2.0 * RAY_OFFSET).max(0.0)),
                );
                shadow_rays.len() - 1
            });
            candidates.push(DirectCandidate {
                light: i,
                to_light,
                attenuation,
                shadow,
            });
        }

        if candidates.is_empty() {
            return Vec3::ZERO;
        }

        let mut occluded: SmallVec<[bool; 16]> = SmallVec::from_elem(false, shadow_rays.len());
        if !shadow_rays.is_empty() {
            self.query.occluded_batch(&shadow_rays, &mut occluded);
        }

        let material = self.material(hit);
        let mut radiance = Vec3::ZERO;
        for c in &candidates {
            if c.shadow.is_some_and(|s| occluded[s]) {
                continue;
            }
            let light = &self.lights[c.light];
            let n_dot_l = n.dot(c.to_light);
            let f = brdf::evaluate(&material, n, wo, c.to_light);
            radiance += light.color() * light.intensity * c.attenuation * f * n_dot_l;
        }
        sanitize(radiance)
    }

    /// One cosine-weighted bounce, weighted by `BRDF * cos / pdf`.
    pub fn evaluate_indirect_lighting(&self, hit: &Hit, wo: Vec3, depth: u32, rng: &mut SmallRng) -> Vec3 {
        if depth >= self.settings.max_bounces {
            return Vec3::ZERO;
        }
        let mut scale = 1.0;
        if depth >= RUSSIAN_ROULETTE_DEPTH {
            if rng.gen::<f32>() >= RUSSIAN_ROULETTE_SURVIVAL {
                return Vec3::ZERO;
            }
            scale = 1.0 / RUSSIAN_ROULETTE_SURVIVAL;
        }

        let n = hit.normal;
        let (dir, pdf) = cosine_hemisphere(n, rng.gen(), rng.gen());
        if pdf <= EPSILON {
            return Vec3::ZERO;
        }
        let n_dot_l = n.dot(dir);
        // Sample dipped under the actual surface
        if hit.geometric_normal.dot(dir) <= 0.0 {
            return Vec3::ZERO;
        }

        let material = self.material(hit);
        let f = brdf::evaluate(&material, n, wo, dir);
        if f == Vec3::ZERO {
            return Vec3::ZERO;
        }

        let ray = Ray::new(hit.position + hit.geometric_normal * RAY_OFFSET, dir)
            .with_range(0.0, f32::INFINITY)
            .with_depth(depth + 1);
        let li = self.trace_path(&ray, depth + 1, rng);
        sanitize(li * f * (n_dot_l / pdf) * scale)
    }

    /// Average `samples_per_pixel` jittered paths through pixel `(x, y)`.
    /// The first sample's primary hit provides the depth and normal outputs.
    pub fn render_pixel(&self, camera: &Camera, x: u32, y: u32, width: u32, height: u32, frame: u64) -> PixelSample {
        let spp = self.settings.samples_per_pixel;
        let mut out = PixelSample {
            color: Vec3::ZERO,
            depth: f32::INFINITY,
            normal: Vec3::ZERO,
        };
        for s in 0..spp {
            let mut rng = pixel_rng(self.settings.seed, x, y, frame, s);
            let jitter = Vec2::new(rng.gen(), rng.gen());
            let ray = camera.generate_ray(x, y, width, height, jitter);

            let radiance = match self.query.closest_hit(&ray) {
                Some(hit) => {
                    if s == 0 {
                        out.depth = hit.t;
                        out.normal = hit.normal;
                    }
                    self.shade(&hit, -ray.direction, 0, &mut rng)
                }
                None => self.settings.sky_color,
            };
            out.color += sanitize(radiance);
        }
        out.color /= spp as f32;
        out
    }
}
