//! Cook–Torrance microfacet BRDF with a Lambert diffuse lobe.
//!
//! GGX normal distribution, Smith / Schlick-GGX geometry, Schlick Fresnel.
//! `F0 = mix(0.04, base_color, metallic)`; the diffuse lobe is scaled by
//! `(1 - F) * (1 - metallic)`.

use std::f32::consts::PI;

use crate::util::{Vec3, EPSILON};
use crate::world::Material;

/// Reflectance of dielectrics at normal incidence.
const DIELECTRIC_F0: f32 = 0.04;
/// Perceptual roughness floor, keeps `D` finite for mirror-like input.
const MIN_ROUGHNESS: f32 = 0.045;

/// GGX / Trowbridge-Reitz distribution, `alpha = roughness²`.
#[inline]
pub fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    a2 / (PI * d * d).max(EPSILON)
}

/// Schlick-GGX single direction term.
#[inline]
fn geometry_schlick_ggx(n_dot_x: f32, k: f32) -> f32 {
    n_dot_x / (n_dot_x * (1.0 - k) + k).max(EPSILON)
}

/// Smith masking-shadowing with the analytic-light remap `k = (r + 1)² / 8`.
#[inline]
pub fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    geometry_schlick_ggx(n_dot_v, k) * geometry_schlick_ggx(n_dot_l, k)
}

#[inline]
pub fn fresnel_schlick(cos_theta: f32, f0: Vec3) -> Vec3 {
    let m = (1.0 - cos_theta).clamp(0.0, 1.0);
    let m5 = m * m * m * m * m;
    f0 + (Vec3::ONE - f0) * m5
}

/// Base reflectance blend between dielectric and metal.
#[inline]
pub fn base_reflectance(material: &Material) -> Vec3 {
    Vec3::splat(DIELECTRIC_F0).lerp(material.base_color, material.metallic.clamp(0.0, 1.0))
}

/// BRDF value for unit vectors `n` (normal), `v` (toward viewer) and `l`
/// (toward light). Excludes the cosine term. Zero below either horizon.
pub fn evaluate(material: &Material, n: Vec3, v: Vec3, l: Vec3) -> Vec3 {
    let n_dot_v = n.dot(v);
    let n_dot_l = n.dot(l);
    if n_dot_v <= EPSILON || n_dot_l <= EPSILON {
        return Vec3::ZERO;
    }
    let h = (v + l).normalize_or_zero();
    if h == Vec3::ZERO {
        return Vec3::ZERO;
    }

    let roughness = material.roughness.clamp(MIN_ROUGHNESS, 1.0);
    let metallic = material.metallic.clamp(0.0, 1.0);
    let n_dot_h = n.dot(h).max(0.0);
    let v_dot_h = v.dot(h).max(0.0);

    let f = fresnel_schlick(v_dot_h, base_reflectance(material));
    let d = distribution_ggx(n_dot_h, roughness);
    let g = geometry_smith(n_dot_v, n_dot_l, roughness);
    let specular = f * (d * g / (4.0 * n_dot_v * n_dot_l).max(EPSILON));

    let kd = (Vec3::ONE - f) * (1.0 - metallic);
    let diffuse = kd * material.base_color / PI;

    diffuse + specular
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mat(metallic: f32, roughness: f32) -> Material {
        Material {
            base_color: Vec3::new(0.9, 0.5, 0.2),
            metallic,
            roughness,
            emission: Vec3::ZERO,
        }
    }

    #[test]
    fn test_below_horizon_is_zero() {
        let m = mat(0.0, 0.5);
        assert_eq!(evaluate(&m, Vec3::Z, Vec3::Z, Vec3::NEG_Z), Vec3::ZERO);
        assert_eq!(evaluate(&m, Vec3::Z, Vec3::NEG_Z, Vec3::Z), Vec3::ZERO);
    }

    #[test]
    fn test_f0_blend() {
        assert_eq!(base_reflectance(&mat(0.0, 0.5)), Vec3::splat(0.04));
        assert_eq!(base_reflectance(&mat(1.0, 0.5)), Vec3::new(0.9, 0.5, 0.2));
    }

    #[test]
    fn test_fresnel_limits() {
        let f0 = Vec3::splat(0.04);
        assert!((fresnel_schlick(1.0, f0) - f0).length() < 1e-6);
        assert!((fresnel_schlick(0.0, f0) - Vec3::ONE).length() < 1e-6);
    }

    #[test]
    fn test_ggx_normalized() {
        // ∫ D(h) (n·h) dω = 1 over the hemisphere
        let roughness = 0.5;
        let steps = 2000;
        let mut sum = 0.0;
        for i in 0..steps {
            let theta = (i as f32 + 0.5) / steps as f32 * (PI / 2.0);
            let c = theta.cos();
            sum += distribution_ggx(c, roughness) * c * theta.sin() * (PI / 2.0 / steps as f32) * 2.0 * PI;
        }
        assert!((sum - 1.0).abs() < 0.02, "∫D = {sum}");
    }

    #[test]
    fn test_energy_bounded() {
        // Directional albedo for normal incidence stays at or below one
        for (metallic, roughness) in [(0.0, 0.2), (0.0, 1.0), (1.0, 0.3), (0.5, 0.7)] {
            let m = Material { base_color: Vec3::splat(0.8), ..mat(metallic, roughness) };
            let v = Vec3::Z;
            let steps = 128;
            let mut albedo = Vec3::ZERO;
            for i in 0..steps {
                for j in 0..steps {
                    let theta = (i as f32 + 0.5) / steps as f32 * (PI / 2.0);
                    let phi = (j as f32 + 0.5) / steps as f32 * 2.0 * PI;
                    let l = Vec3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos());
                    let dw = theta.sin() * (PI / 2.0 / steps as f32) * (2.0 * PI / steps as f32);
                    albedo += evaluate(&m, Vec3::Z, v, l) * l.z * dw;
                }
            }
            assert!(albedo.max_element() <= 1.02, "m={metallic} r={roughness} albedo={albedo}");
            assert!(albedo.min_element() > 0.0);
        }
    }
}
