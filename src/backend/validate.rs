//! Cross-validation of backend output against the software integrator.

use std::fmt;

use crate::util::Vec3;

/// RMSE delta between backends above which parity is reported as a regression.
pub const PARITY_RMSE_THRESHOLD: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendId {
    Software,
    Hardware,
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Software => "software",
            Self::Hardware => "hardware",
        })
    }
}

/// Latest validation result of one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRecord {
    pub backend: BackendId,
    pub map: String,
    pub width: u32,
    pub height: u32,
    pub frame: u64,
    /// Pixels compared
    pub samples: usize,
    pub rmse: f32,
    pub max_error: f32,
    /// Scene light hash the frame was rendered with
    pub content_hash: u64,
}

/// Frame identity for a validation pass.
#[derive(Debug, Clone, Copy)]
pub struct ValidationKey<'a> {
    pub backend: BackendId,
    pub map: &'a str,
    pub width: u32,
    pub height: u32,
    pub frame: u64,
    pub content_hash: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParityReport {
    pub software_rmse: f32,
    pub hardware_rmse: f32,
    pub delta: f32,
    pub regression: bool,
}

#[derive(Debug, Default)]
pub struct Validator {
    stride: u32,
    software: Option<ValidationRecord>,
    hardware: Option<ValidationRecord>,
    last_parity_frame: Option<u64>,
    last_parity: Option<ParityReport>,
}

impl Validator {
    /// `stride == 0` disables validation.
    pub fn new(stride: u32) -> Self {
        Self {
            stride,
            ..Default::default()
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.stride > 0
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn set_stride(&mut self, stride: u32) {
        self.stride = stride;
    }

    /// Every `stride`-th pixel in both axes.
    pub fn sample_points(&self, width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
        let step = self.stride.max(1) as usize;
        let active = self.enabled();
        (0..height)
            .step_by(step)
            .flat_map(move |y| (0..width).step_by(step).map(move |x| (x, y)))
            .filter(move |_| active)
    }

    pub fn record(&self, backend: BackendId) -> Option<&ValidationRecord> {
        match backend {
            BackendId::Software => self.software.as_ref(),
            BackendId::Hardware => self.hardware.as_ref(),
        }
    }

    pub fn last_parity(&self) -> Option<ParityReport> {
        self.last_parity
    }

    /// Compare `(produced, reference)` pairs, store the record and check parity.
    pub fn validate(
        &mut self,
        key: ValidationKey<'_>,
        pairs: impl IntoIterator<Item = (Vec3, Vec3)>,
    ) -> Option<&ValidationRecord> {
        if !self.enabled() {
            return None;
        }

        let mut sum_sq = 0.0f64;
        let mut max_error = 0.0f32;
        let mut samples = 0usize;
        for (produced, reference) in pairs {
            let diff = (produced - reference).abs();
            if !diff.is_finite() {
                continue;
            }
            sum_sq += diff.length_squared() as f64;
            max_error = max_error.max(diff.max_element());
            samples += 1;
        }
        if samples == 0 {
            return None;
        }
        let rmse = (sum_sq / (samples as f64 * 3.0)).sqrt() as f32;

        let record = ValidationRecord {
            backend: key.backend,
            map: key.map.to_owned(),
            width: key.width,
            height: key.height,
            frame: key.frame,
            samples,
            rmse,
            max_error,
            content_hash: key.content_hash,
        };
        tracing::debug!(
            backend = %record.backend,
            frame = record.frame,
            samples,
            rmse,
            max_error,
            "validation pass"
        );
        match key.backend {
            BackendId::Software => self.software = Some(record),
            BackendId::Hardware => self.hardware = Some(record),
        }
        self.check_parity();
        self.record(key.backend)
    }

    fn check_parity(&mut self) {
        let (Some(sw), Some(hw)) = (&self.software, &self.hardware) else {
            return;
        };
        if sw.map != hw.map || (sw.width, sw.height) != (hw.width, hw.height) {
            return;
        }
        if let Some(last) = self.last_parity_frame {
            if sw.frame <= last || hw.frame <= last {
                return;
            }
        }

        let delta = (hw.rmse - sw.rmse).abs();
        let report = ParityReport {
            software_rmse: sw.rmse,
            hardware_rmse: hw.rmse,
            delta,
            regression: delta > PARITY_RMSE_THRESHOLD,
        };
        if report.regression {
            tracing::warn!(
                map = %hw.map,
                software_rmse = sw.rmse,
                hardware_rmse = hw.rmse,
                delta,
                "backend parity regression"
            );
        } else {
            tracing::debug!(map = %hw.map, delta, "backend parity ok");
        }
        self.last_parity_frame = Some(sw.frame.max(hw.frame));
        self.last_parity = Some(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(backend: BackendId, frame: u64) -> ValidationKey<'static> {
        ValidationKey {
            backend,
            map: "box",
            width: 8,
            height: 8,
            frame,
            content_hash: 1,
        }
    }

    #[test]
    fn test_disabled() {
        let mut v = Validator::new(0);
        assert_eq!(v.sample_points(8, 8).count(), 0);
        assert!(v.validate(key(BackendId::Software, 1), [(Vec3::ONE, Vec3::ZERO)]).is_none());
    }

    #[test]
    fn test_stride_points() {
        let v = Validator::new(3);
        let pts: Vec<_> = v.sample_points(7, 4).collect();
        assert_eq!(pts, vec![(0, 0), (3, 0), (6, 0), (0, 3), (3, 3), (6, 3)]);
    }

    #[test]
    fn test_rmse_and_max() {
        let mut v = Validator::new(1);
        let pairs = [
            (Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO),
            (Vec3::ZERO, Vec3::ZERO),
        ];
        let r = v.validate(key(BackendId::Hardware, 1), pairs).unwrap();
        // One unit error over 6 channel samples
        assert!((r.rmse - (1.0f32 / 6.0).sqrt()).abs() < 1e-6);
        assert_eq!(r.max_error, 1.0);
        assert_eq!(r.samples, 2);
    }

    #[test]
    fn test_parity_reported_once_per_fresh_pair() {
        let mut v = Validator::new(1);
        let exact = [(Vec3::ONE, Vec3::ONE)];
        let off = [(Vec3::ONE, Vec3::splat(0.5))];

        v.validate(key(BackendId::Software, 1), exact);
        assert!(v.last_parity().is_none());
        v.validate(key(BackendId::Hardware, 2), off);
        let p = v.last_parity().unwrap();
        assert!(p.regression);
        assert!((p.delta - 0.5).abs() < 1e-6);

        // Hardware again without a newer software record: no new report
        v.validate(key(BackendId::Hardware, 3), exact);
        assert!(v.last_parity().unwrap().regression);

        v.validate(key(BackendId::Software, 4), exact);
        v.validate(key(BackendId::Hardware, 5), exact);
        let p = v.last_parity().unwrap();
        assert!(!p.regression);
        assert_eq!(p.delta, 0.0);
    }

    #[test]
    fn test_different_resolution_not_compared() {
        let mut v = Validator::new(1);
        v.validate(key(BackendId::Software, 1), [(Vec3::ONE, Vec3::ONE)]);
        let mut k = key(BackendId::Hardware, 2);
        k.width = 16;
        v.validate(k, [(Vec3::ONE, Vec3::ZERO)]);
        assert!(v.last_parity().is_none());
    }
}
