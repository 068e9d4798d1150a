//! Per-frame merge of dynamic and static lights with change detection.

use super::{LightingMode, SceneLight, MAX_SCENE_LIGHTS};
use crate::light::Light;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildResult {
    pub count: usize,
    pub hash: u64,
    /// Hash differs from the previous rebuild (scene lighting changed)
    pub changed: bool,
}

/// Owns the aggregated array and the previous content hash.
#[derive(Debug)]
pub struct SceneLightAggregator {
    capacity: usize,
    lights: Vec<SceneLight>,
    hash: Option<u64>,
    dynamic_count: usize,
}

impl SceneLightAggregator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lights: Vec::with_capacity(capacity),
            hash: None,
            dynamic_count: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn lights(&self) -> &[SceneLight] {
        &self.lights
    }

    /// Hash of the last rebuild.
    #[inline]
    pub fn hash(&self) -> Option<u64> {
        self.hash
    }

    /// Lights of the last rebuild that came from the dynamic source.
    #[inline]
    pub fn dynamic_count(&self) -> usize {
        self.dynamic_count
    }

    #[inline]
    pub fn static_count(&self) -> usize {
        self.lights.len() - self.dynamic_count
    }

    /// Rebuild the array: dynamic lights first (legacy lights stand in when
    /// no pool light is visible), then statics in `All` mode. Lights beyond
    /// the cap are dropped without priority ordering.
    pub fn rebuild(
        &mut self,
        dynamic: &[Light],
        legacy: &[Light],
        statics: &[Light],
        mode: LightingMode,
    ) -> RebuildResult {
        self.lights.clear();
        self.dynamic_count = 0;

        if mode != LightingMode::Off {
            let source = if dynamic.is_empty() { legacy } else { dynamic };
            self.push_all(source);
            self.dynamic_count = self.lights.len();
            if mode == LightingMode::All {
                self.push_all(statics);
            }
        }

        let hash = content_hash(&self.lights);
        let changed = self.hash != Some(hash);
        if changed {
            tracing::debug!(
                count = self.lights.len(),
                hash = format_args!("{hash:016x}"),
                %mode,
                "scene lights changed"
            );
        }
        self.hash = Some(hash);

        RebuildResult {
            count: self.lights.len(),
            hash,
            changed,
        }
    }

    fn push_all(&mut self, lights: &[Light]) {
        let room = self.capacity.saturating_sub(self.lights.len());
        self.lights
            .extend(lights.iter().take(room).map(SceneLight::from_light));
    }
}

impl Default for SceneLightAggregator {
    fn default() -> Self {
        Self::new(MAX_SCENE_LIGHTS)
    }
}

/// MurmurHash3 over the raw record bytes, folded to 64 bits.
pub(crate) fn content_hash(lights: &[SceneLight]) -> u64 {
    murmur3::hash64(bytemuck::cast_slice(lights))
}
