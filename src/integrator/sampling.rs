//! Random sequences and hemisphere sampling.

use std::f32::consts::PI;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::util::{orthonormal_basis, Vec3, EPSILON};

/// SplitMix64 finalizer.
#[inline]
fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Generator for one pixel sample. Same inputs, same sequence.
pub fn pixel_rng(seed: u64, x: u32, y: u32, frame: u64, sample: u32) -> SmallRng {
    let pixel = ((y as u64) << 32) | x as u64;
    let s = mix64(seed ^ mix64(pixel ^ mix64(frame ^ mix64(sample as u64))));
    SmallRng::seed_from_u64(s)
}

/// Cosine-weighted direction around `n` from two uniforms in `[0, 1)`.
///
/// Returns `(direction, pdf)` with `pdf = cos θ / π`.
pub fn cosine_hemisphere(n: Vec3, u1: f32, u2: f32) -> (Vec3, f32) {
    let r = u1.sqrt();
    let phi = 2.0 * PI * u2;
    let x = r * phi.cos();
    let y = r * phi.sin();
    let z = (1.0 - u1).max(0.0).sqrt();

    let (t, b) = orthonormal_basis(n);
    let dir = (t * x + b * y + n * z).normalize_or_zero();
    let pdf = dir.dot(n).max(0.0) / PI;
    (dir, if pdf > EPSILON { pdf } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_rng_deterministic() {
        let a: Vec<u32> = pixel_rng(7, 3, 4, 10, 0).sample_iter(rand::distributions::Standard).take(8).collect();
        let b: Vec<u32> = pixel_rng(7, 3, 4, 10, 0).sample_iter(rand::distributions::Standard).take(8).collect();
        let c: Vec<u32> = pixel_rng(7, 4, 3, 10, 0).sample_iter(rand::distributions::Standard).take(8).collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_cosine_samples_in_hemisphere() {
        let n = Vec3::new(0.3, -0.5, 0.8).normalize();
        let mut rng = pixel_rng(1, 0, 0, 0, 0);
        let mut mean_cos = 0.0;
        let count = 4000;
        for _ in 0..count {
            let (d, pdf) = cosine_hemisphere(n, rng.gen(), rng.gen());
            assert!((d.length() - 1.0).abs() < 1e-4);
            assert!(d.dot(n) >= -1e-5);
            if pdf > 0.0 {
                assert!((pdf - d.dot(n) / PI).abs() < 1e-5);
            }
            mean_cos += d.dot(n);
        }
        // E[cos θ] = 2/3 under cosine weighting
        mean_cos /= count as f32;
        assert!((mean_cos - 2.0 / 3.0).abs() < 0.03, "{mean_cos}");
    }
}
