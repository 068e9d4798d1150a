//! Two-stage denoiser: adaptive temporal blend, then an optional joint
//! bilateral filter guided by luminance and accumulated variance.

use super::AccumulationBuffer;
use crate::util::{luminance, sanitize, Vec3, EPSILON};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DenoiseSettings {
    /// Lower bound of the temporal blend factor
    pub min_alpha: f32,
    pub spatial: bool,
    /// Filter window is `(2r + 1)²`
    pub radius: u32,
    pub sigma_spatial: f32,
    pub sigma_luminance: f32,
    pub variance_influence: f32,
}

impl Default for DenoiseSettings {
    fn default() -> Self {
        Self {
            min_alpha: 0.05,
            spatial: true,
            radius: 2,
            sigma_spatial: 1.5,
            sigma_luminance: 0.25,
            variance_influence: 4.0,
        }
    }
}

/// Temporal history plus output storage.
#[derive(Debug, Clone, Default)]
pub struct Denoiser {
    settings: DenoiseSettings,
    width: u32,
    height: u32,
    history: Vec<Vec3>,
    /// Sample count each history pixel was last blended at
    seen: Vec<u32>,
    has_history: bool,
    temporal: Vec<Vec3>,
    output: Vec<Vec3>,
}

impl Denoiser {
    pub fn new(settings: DenoiseSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> &DenoiseSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: DenoiseSettings) {
        self.settings = settings;
    }

    /// Forget the temporal history.
    pub fn reset(&mut self) {
        self.history.clear();
        self.seen.clear();
        self.has_history = false;
    }

    pub fn output(&self) -> &[Vec3] {
        &self.output
    }

    /// Filter `current`, this frame's raw samples (one value per pixel of
    /// `accum`). Pixels whose count did not move since the last call keep
    /// their history.
    pub fn denoise(&mut self, accum: &AccumulationBuffer, current: &[Vec3]) -> &[Vec3] {
        let (w, h) = accum.dimensions();
        let n = w as usize * h as usize;
        if (w, h) != (self.width, self.height) || self.history.len() != n {
            self.width = w;
            self.height = h;
            self.history = vec![Vec3::ZERO; n];
            self.seen = vec![0; n];
            self.has_history = false;
        }
        if current.len() != n {
            tracing::warn!(expected = n, got = current.len(), "denoise input size mismatch");
            self.output.clear();
            self.output.extend(current.iter().map(|&c| sanitize(c)));
            return &self.output;
        }

        self.temporal_pass(accum, current);
        self.history.copy_from_slice(&self.temporal);
        self.has_history = true;

        if self.settings.spatial && self.settings.radius > 0 {
            self.spatial_pass(accum);
        } else {
            self.output.clone_from(&self.temporal);
        }
        &self.output
    }

    /// `alpha = clamp(1 / n, min_alpha, 1)`, `out = lerp(history, current, alpha)`.
    /// With `min_alpha <= 1 / n` this is the running mean of the samples.
    fn temporal_pass(&mut self, accum: &AccumulationBuffer, current: &[Vec3]) {
        let min_alpha = self.settings.min_alpha.clamp(0.0, 1.0);
        let blend = self.has_history && accum.temporal();
        let counts = accum.counts();
        self.temporal.clear();
        for (i, &c) in current.iter().enumerate() {
            let c = sanitize(c);
            let n = counts[i];
            let seen = self.seen[i];
            self.seen[i] = n;
            let out = if n == 0 || !blend || seen == 0 || n < seen {
                c
            } else if n == seen {
                self.history[i]
            } else {
                let alpha = (1.0 / n as f32).clamp(min_alpha, 1.0);
                sanitize(self.history[i].lerp(c, alpha))
            };
            self.temporal.push(out);
        }
    }

    fn spatial_pass(&mut self, accum: &AccumulationBuffer) {
        let (w, h) = (self.width as i64, self.height as i64);
        let r = self.settings.radius as i64;
        let two_ss = 2.0 * self.settings.sigma_spatial.max(EPSILON).powi(2);
        let two_sl = 2.0 * self.settings.sigma_luminance.max(EPSILON).powi(2);
        let influence = self.settings.variance_influence.max(0.0);
        let counts = accum.counts();
        let src = &self.temporal;

        self.output.clear();
        self.output.reserve(src.len());
        for y in 0..h {
            for x in 0..w {
                let ci = (y * w + x) as usize;
                if counts[ci] == 0 {
                    self.output.push(src[ci]);
                    continue;
                }
                let center_lum = luminance(src[ci]);

                let mut sum = Vec3::ZERO;
                let mut total = 0.0f32;
                for dy in -r..=r {
                    let ny = y + dy;
                    if ny < 0 || ny >= h {
                        continue;
                    }
                    for dx in -r..=r {
                        let nx = x + dx;
                        if nx < 0 || nx >= w {
                            continue;
                        }
                        let ni = (ny * w + nx) as usize;
                        if counts[ni] == 0 {
                            continue;
                        }
                        let d2 = (dx * dx + dy * dy) as f32;
                        let dl = luminance(src[ni]) - center_lum;
                        let weight = (-d2 / two_ss).exp()
                            * (-(dl * dl) / two_sl).exp()
                            / (1.0 + accum.luminance_variance_at(ni) * influence);
                        if weight.is_finite() && weight > 0.0 {
                            sum += src[ni] * weight;
                            total += weight;
                        }
                    }
                }
                self.output.push(if total > EPSILON { sanitize(sum / total) } else { src[ci] });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(w: u32, h: u32, f: impl Fn(u32, u32) -> Vec3) -> (AccumulationBuffer, Vec<Vec3>) {
        let mut acc = AccumulationBuffer::new(w, h);
        for y in 0..h {
            for x in 0..w {
                acc.accumulate(x, y, f(x, y));
            }
        }
        let current = acc.means().to_vec();
        (acc, current)
    }

    fn temporal_only() -> DenoiseSettings {
        DenoiseSettings {
            spatial: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_frame_passes_through() {
        let (acc, cur) = filled(4, 4, |x, y| Vec3::splat((x + y) as f32));
        let mut d = Denoiser::new(temporal_only());
        assert_eq!(d.denoise(&acc, &cur), cur.as_slice());
    }

    #[test]
    fn test_temporal_alpha() {
        let mut acc = AccumulationBuffer::new(1, 1);
        let mut d = Denoiser::new(DenoiseSettings {
            min_alpha: 0.3,
            ..temporal_only()
        });
        acc.accumulate(0, 0, Vec3::ZERO);
        d.denoise(&acc, &[Vec3::ZERO]);

        // n = 2: alpha = 0.5
        acc.accumulate(0, 0, Vec3::ONE);
        let out = d.denoise(&acc, &[Vec3::ONE])[0];
        assert!((out.x - 0.5).abs() < 1e-6);

        // n = 10: alpha clamped up to min_alpha
        for _ in 0..8 {
            acc.accumulate(0, 0, Vec3::ONE);
        }
        let out = d.denoise(&acc, &[Vec3::splat(2.0)])[0];
        assert!((out.x - (0.5 + (2.0 - 0.5) * 0.3)).abs() < 1e-5);
    }

    #[test]
    fn test_constant_image_unchanged_by_bilateral() {
        let (acc, cur) = filled(6, 5, |_, _| Vec3::new(0.2, 0.4, 0.6));
        let mut d = Denoiser::new(DenoiseSettings::default());
        let out = d.denoise(&acc, &cur);
        assert!(out.iter().all(|c| (*c - Vec3::new(0.2, 0.4, 0.6)).length() < 1e-6));
    }

    #[test]
    fn test_edge_preserved_and_noise_reduced() {
        // Left half dark, right half bright, mild checker noise on both
        let f = |x: u32, y: u32| {
            let base = if x < 4 { 0.1 } else { 5.0 };
            let noise = if (x + y) % 2 == 0 { 0.02 } else { -0.02 };
            Vec3::splat(base + noise)
        };
        let (acc, cur) = filled(8, 8, f);
        let mut d = Denoiser::new(DenoiseSettings::default());
        let out = d.denoise(&acc, &cur).to_vec();

        // Dark pixel next to the edge does not bleed toward the bright side
        assert!(out[(3 * 8 + 3) as usize].x < 0.2);
        assert!(out[(3 * 8 + 4) as usize].x > 4.8);
        // Checker noise shrinks inside a flat region
        let before = (cur[9].x - cur[10].x).abs();
        let after = (out[9].x - out[10].x).abs();
        assert!(after < before);
    }

    #[test]
    fn test_zero_sample_pixels_pass_through() {
        let mut acc = AccumulationBuffer::new(3, 1);
        acc.accumulate(0, 0, Vec3::ONE);
        acc.accumulate(2, 0, Vec3::ONE);
        let cur = vec![Vec3::ONE, Vec3::splat(7.0), Vec3::ONE];
        let mut d = Denoiser::new(DenoiseSettings::default());
        let out = d.denoise(&acc, &cur);
        assert_eq!(out[1], Vec3::splat(7.0));
        // Unsampled neighbour does not pull the others
        assert!((out[0] - Vec3::ONE).length() < 1e-6);
    }

    #[test]
    fn test_temporal_output_tracks_accumulated_mean() {
        let mut acc = AccumulationBuffer::new(1, 1);
        let mut d = Denoiser::new(DenoiseSettings {
            min_alpha: 0.0,
            ..temporal_only()
        });
        for frame in 0..10 {
            let sample = Vec3::splat((frame % 2) as f32);
            acc.accumulate(0, 0, sample);
            let out = d.denoise(&acc, &[sample])[0];
            assert!(
                (out - acc.mean(0, 0)).abs().max_element() < 1e-6,
                "frame {frame}: {out} vs {}",
                acc.mean(0, 0)
            );
        }
        assert!((d.output()[0].x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_unsampled_pixel_keeps_history() {
        let mut acc = AccumulationBuffer::new(1, 1);
        let mut d = Denoiser::new(temporal_only());
        acc.accumulate(0, 0, Vec3::ONE);
        d.denoise(&acc, &[Vec3::ONE]);
        // No new sample: a stale value in `current` is ignored
        assert_eq!(d.denoise(&acc, &[Vec3::splat(9.0)])[0], Vec3::ONE);
    }

    #[test]
    fn test_reset_drops_history() {
        let mut acc = AccumulationBuffer::new(1, 1);
        let mut d = Denoiser::new(temporal_only());
        acc.accumulate(0, 0, Vec3::ZERO);
        d.denoise(&acc, &[Vec3::ZERO]);
        acc.accumulate(0, 0, Vec3::ONE);
        d.reset();
        assert_eq!(d.denoise(&acc, &[Vec3::ONE])[0], Vec3::ONE);
    }
}
