//! Per-pixel running mean and variance (Welford).

use crate::util::{luminance, sanitize, Vec3};

/// Running statistics for every pixel of the output.
///
/// For sample `s` with the count incremented first:
/// `mean += (s - mean) / n`, `m2 += (s - old_mean) * (s - new_mean)`.
#[derive(Debug, Clone)]
pub struct AccumulationBuffer {
    width: u32,
    height: u32,
    mean: Vec<Vec3>,
    m2: Vec<Vec3>,
    count: Vec<u32>,
    temporal: bool,
}

impl AccumulationBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let n = width as usize * height as usize;
        Self {
            width,
            height,
            mean: vec![Vec3::ZERO; n],
            m2: vec![Vec3::ZERO; n],
            count: vec![0; n],
            temporal: true,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Reallocate for a new resolution. Returns `true` (and clears) when the
    /// size actually changed.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if (width, height) == (self.width, self.height) {
            return false;
        }
        *self = Self {
            temporal: self.temporal,
            ..Self::new(width, height)
        };
        true
    }

    /// Zero mean, M2 and counts. Idempotent.
    pub fn reset(&mut self) {
        self.mean.fill(Vec3::ZERO);
        self.m2.fill(Vec3::ZERO);
        self.count.fill(0);
    }

    /// With temporal accumulation off every sample replaces the pixel.
    pub fn set_temporal(&mut self, temporal: bool) {
        self.temporal = temporal;
    }

    #[inline]
    pub fn temporal(&self) -> bool {
        self.temporal
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y as usize * self.width as usize + x as usize)
    }

    /// Fold one sample into pixel `(x, y)`. Out-of-range pixels are ignored;
    /// non-finite channels count as zero.
    pub fn accumulate(&mut self, x: u32, y: u32, sample: Vec3) {
        let Some(i) = self.index(x, y) else { return };
        let sample = sanitize(sample);

        if !self.temporal {
            self.mean[i] = sample;
            self.m2[i] = Vec3::ZERO;
            self.count[i] = 1;
            return;
        }

        let n = self.count[i].saturating_add(1);
        self.count[i] = n;
        let old_mean = self.mean[i];
        let new_mean = old_mean + (sample - old_mean) / n as f32;
        self.mean[i] = new_mean;
        self.m2[i] += (sample - old_mean) * (sample - new_mean);
    }

    pub fn mean(&self, x: u32, y: u32) -> Vec3 {
        self.index(x, y).map_or(Vec3::ZERO, |i| self.mean[i])
    }

    pub fn count(&self, x: u32, y: u32) -> u32 {
        self.index(x, y).map_or(0, |i| self.count[i])
    }

    /// Sample variance per channel, zero below two samples.
    pub fn variance(&self, x: u32, y: u32) -> Vec3 {
        self.index(x, y).map_or(Vec3::ZERO, |i| self.variance_at(i))
    }

    #[inline]
    pub(crate) fn variance_at(&self, i: usize) -> Vec3 {
        match self.count[i] {
            0 | 1 => Vec3::ZERO,
            n => self.m2[i] / (n - 1) as f32,
        }
    }

    /// Luminance of the per-channel variance.
    #[inline]
    pub(crate) fn luminance_variance_at(&self, i: usize) -> f32 {
        luminance(self.variance_at(i))
    }

    pub fn means(&self) -> &[Vec3] {
        &self.mean
    }

    pub fn counts(&self) -> &[u32] {
        &self.count
    }

    /// Smallest per-pixel count (0 for an empty buffer).
    pub fn min_count(&self) -> u32 {
        self.count.iter().copied().min().unwrap_or(0)
    }
}
