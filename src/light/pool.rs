//! Generational light pool and light/surface interaction arena.
//!
//! Both containers are fixed-capacity slabs with a free-index stack, so
//! allocate and release are O(1) and exhaustion is a soft failure: the caller
//! gets `None`, a warning is logged once, and the frame continues.

use smallvec::SmallVec;

use super::Light;
use crate::util::{Error, Frustum};
use crate::world::{VisibilitySet, World};

/// Generational pool handle. A handle whose generation no longer matches its
/// slot refers to a released light and is ignored everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightHandle {
    pub index: u32,
    pub generation: u32,
}

/// Light ↔ surface relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interaction {
    pub light: LightHandle,
    pub surface: u32,
}

/// Bounded interaction storage with a free-index stack.
#[derive(Debug)]
pub struct InteractionArena {
    slots: Vec<Option<Interaction>>,
    free: Vec<u32>,
    live: usize,
    exhausted_reported: bool,
}

impl InteractionArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            free: (0..capacity as u32).rev().collect(),
            live: 0,
            exhausted_reported: false,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn get(&self, id: u32) -> Option<&Interaction> {
        self.slots.get(id as usize)?.as_ref()
    }

    fn alloc(&mut self, interaction: Interaction) -> Option<u32> {
        let Some(id) = self.free.pop() else {
            if !self.exhausted_reported {
                self.exhausted_reported = true;
                tracing::warn!("{}", Error::InteractionArenaFull(self.capacity()));
            }
            return None;
        };
        self.slots[id as usize] = Some(interaction);
        self.live += 1;
        Some(id)
    }

    fn free(&mut self, id: u32) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            if slot.take().is_some() {
                self.free.push(id);
                self.live -= 1;
                self.exhausted_reported = false;
            }
        }
    }
}

#[derive(Debug)]
struct Slot {
    light: Option<Light>,
    generation: u32,
    /// Interaction ids owned by this light
    interactions: SmallVec<[u32; 8]>,
    last_visible_frame: Option<u64>,
    /// Needs its interactions rebuilt
    dirty: bool,
    /// Neighbours in insertion order among active slots
    prev: Option<u32>,
    next: Option<u32>,
}

/// Fixed-capacity light pool.
#[derive(Debug)]
pub struct LightPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Oldest and newest active slots
    head: Option<u32>,
    tail: Option<u32>,
    active: usize,
    arena: InteractionArena,
    full_reported: bool,
    last_refresh_frame: Option<u64>,
}

impl LightPool {
    pub fn new(max_lights: usize, max_interactions: usize) -> Self {
        Self {
            slots: (0..max_lights)
                .map(|_| Slot {
                    light: None,
                    generation: 0,
                    interactions: SmallVec::new(),
                    last_visible_frame: None,
                    dirty: false,
                    prev: None,
                    next: None,
                })
                .collect(),
            free: (0..max_lights as u32).rev().collect(),
            head: None,
            tail: None,
            active: 0,
            arena: InteractionArena::new(max_interactions),
            full_reported: false,
            last_refresh_frame: None,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.active
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    /// Active slot indices, oldest first.
    fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::successors(self.head, move |&i| self.slots[i as usize].next)
    }

    fn link_back(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.prev = self.tail;
        slot.next = None;
        match self.tail {
            Some(t) => self.slots[t as usize].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.active += 1;
    }

    fn unlink(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        let (prev, next) = (slot.prev.take(), slot.next.take());
        match prev {
            Some(p) => self.slots[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n as usize].prev = prev,
            None => self.tail = prev,
        }
        self.active -= 1;
    }

    pub fn interactions(&self) -> &InteractionArena {
        &self.arena
    }

    /// Insert a light. `None` when the pool is full (warned once until a
    /// release frees space).
    pub fn allocate(&mut self, mut light: Light) -> Option<LightHandle> {
        let Some(index) = self.free.pop() else {
            if !self.full_reported {
                self.full_reported = true;
                tracing::warn!("{}", Error::LightPoolFull(self.capacity()));
            }
            return None;
        };
        light.clamp_radius();

        let slot = &mut self.slots[index as usize];
        slot.light = Some(light);
        slot.last_visible_frame = None;
        slot.dirty = true;
        let generation = slot.generation;
        self.link_back(index);

        Some(LightHandle { index, generation })
    }

    /// Release a light and its interactions. Stale handles return `false`.
    pub fn release(&mut self, handle: LightHandle) -> bool {
        if self.get(handle).is_none() {
            return false;
        }
        self.release_light_interactions(handle);

        let slot = &mut self.slots[handle.index as usize];
        slot.light = None;
        slot.generation = slot.generation.wrapping_add(1);
        slot.last_visible_frame = None;
        self.unlink(handle.index);
        self.free.push(handle.index);
        self.full_reported = false;
        true
    }

    /// Release every non-static light (end of frame for dynamic lights).
    pub fn release_dynamic(&mut self) -> usize {
        let handles: Vec<LightHandle> = self
            .iter()
            .filter(|(_, l)| !l.is_static)
            .map(|(h, _)| h)
            .collect();
        handles.into_iter().filter(|&h| self.release(h)).count()
    }

    pub fn get(&self, handle: LightHandle) -> Option<&Light> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.light.as_ref()
    }

    /// Modify a light in place; its interactions are rebuilt on the next refresh.
    pub fn update(&mut self, handle: LightHandle, f: impl FnOnce(&mut Light)) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return false;
        };
        if slot.generation != handle.generation {
            return false;
        }
        let Some(light) = slot.light.as_mut() else {
            return false;
        };
        f(light);
        light.clamp_radius();
        slot.dirty = true;
        true
    }

    /// Active lights in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (LightHandle, &Light)> + '_ {
        self.indices().filter_map(move |i| {
            let slot = &self.slots[i as usize];
            slot.light.as_ref().map(|l| {
                (
                    LightHandle {
                        index: i,
                        generation: slot.generation,
                    },
                    l,
                )
            })
        })
    }

    pub fn last_visible_frame(&self, handle: LightHandle) -> Option<u64> {
        self.get(handle)?;
        self.slots[handle.index as usize].last_visible_frame
    }

    /// Lights visible from the current view, in insertion order.
    ///
    /// Directional lights always pass. Others are rejected when their sphere
    /// of influence lies behind a frustum plane, or when both the light's area
    /// and a visibility row are known and the area is not in the row.
    pub fn cull_visible(
        &mut self,
        frustum: &Frustum,
        pvs: Option<VisibilitySet<'_>>,
        frame: u64,
    ) -> Vec<LightHandle> {
        let mut visible = Vec::new();
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let slot = &mut self.slots[index as usize];
            cursor = slot.next;
            let Some(light) = slot.light.as_ref() else { continue };

            let pass = light.is_directional()
                || (frustum.intersects_sphere(light.origin, light.radius)
                    && match (light.area, pvs) {
                        (Some(area), Some(row)) => row.contains(area),
                        _ => true,
                    });
            if !pass {
                continue;
            }
            slot.last_visible_frame = Some(frame);
            visible.push(LightHandle {
                index,
                generation: slot.generation,
            });
        }
        visible
    }

    /// Record one interaction owned by `light`.
    pub fn link(&mut self, light: LightHandle, surface: u32) -> Option<u32> {
        self.get(light)?;
        let id = self.arena.alloc(Interaction { light, surface })?;
        self.slots[light.index as usize].interactions.push(id);
        Some(id)
    }

    /// Drop every interaction owned by a light.
    pub fn release_light_interactions(&mut self, light: LightHandle) -> usize {
        if self.get(light).is_none() {
            return 0;
        }
        let ids = std::mem::take(&mut self.slots[light.index as usize].interactions);
        for &id in &ids {
            self.arena.free(id);
        }
        ids.len()
    }

    /// Drop every interaction that references a surface.
    pub fn release_surface(&mut self, surface: u32) -> usize {
        let mut released = 0;
        let arena = &mut self.arena;
        for slot in &mut self.slots {
            slot.interactions.retain(|id| {
                let hit = arena.get(*id).is_some_and(|i| i.surface == surface);
                if hit {
                    arena.free(*id);
                    released += 1;
                }
                !hit
            });
        }
        released
    }

    /// Rebuild interactions of dirty lights that were culled visible in
    /// `frame`. Runs at most once per frame; returns the links made.
    pub fn refresh_interactions(&mut self, world: &World, frame: u64) -> usize {
        if self.last_refresh_frame == Some(frame) {
            return 0;
        }
        self.last_refresh_frame = Some(frame);

        let stamped: Vec<LightHandle> = self
            .iter()
            .filter(|(h, l)| {
                let slot = &self.slots[h.index as usize];
                slot.dirty && slot.last_visible_frame == Some(frame) && !l.is_directional()
            })
            .map(|(h, _)| h)
            .collect();

        let mut linked = 0;
        for handle in stamped {
            self.release_light_interactions(handle);
            let Some(light) = self.get(handle).copied() else { continue };
            for (idx, surface) in world.surfaces.iter().enumerate() {
                if !surface.is_traceable() || !surface.bounds.intersects_sphere(light.origin, light.radius) {
                    continue;
                }
                if self.link(handle, idx as u32).is_none() {
                    break;
                }
                linked += 1;
            }
            self.slots[handle.index as usize].dirty = false;
        }
        if linked > 0 {
            tracing::debug!(linked, frame, "light interactions refreshed");
        }
        linked
    }
}

impl Default for LightPool {
    fn default() -> Self {
        Self::new(super::DEFAULT_MAX_LIGHTS, super::DEFAULT_MAX_INTERACTIONS)
    }
}
