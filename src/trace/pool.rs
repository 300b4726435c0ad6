// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use crate::{
    error::TraceError,
    shader::{
        CompileFlags,
        ImageKey,
        ShaderKey,
    },
};

#[derive(Clone, Debug)]
enum Slot<T> {
    Live(T),
    Dead { next: Option<u32> },
}

/// Growable arena handing out stable `u32` handles.
///
/// Released slots are chained into a free list stored in the slots themselves and are
/// overwritten by the next `add`. Growth moves the backing store but never renumbers.
#[derive(Clone, Debug)]
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    dead:  Option<u32>,
    live:  usize,
    name:  &'static str,
}

impl<T> Pool<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            slots: Vec::new(),
            dead: None,
            live: 0,
            name,
        }
    }

    pub fn add(
        &mut self,
        item: T,
    ) -> Result<u32, TraceError> {
        if let Some(handle) = self.dead {
            let slot = &mut self.slots[handle as usize];
            if let Slot::Dead { next } = *slot {
                self.dead = next;
            }
            *slot = Slot::Live(item);
            self.live += 1;
            return Ok(handle);
        }

        let handle = u32::try_from(self.slots.len())
            .map_err(|_| TraceError::PoolExhausted { pool: self.name })?;
        self.slots.push(Slot::Live(item));
        self.live += 1;
        Ok(handle)
    }

    /// Takes the item out and queues its slot for reuse.
    pub fn release(
        &mut self,
        handle: u32,
    ) -> Option<T> {
        let slot = self.slots.get_mut(handle as usize)?;
        if matches!(slot, Slot::Dead { .. }) {
            return None;
        }
        let Slot::Live(item) = std::mem::replace(slot, Slot::Dead { next: self.dead }) else {
            return None;
        };
        self.dead = Some(handle);
        self.live -= 1;
        Some(item)
    }

    #[inline]
    pub fn get(
        &self,
        handle: u32,
    ) -> Option<&T> {
        match self.slots.get(handle as usize)? {
            Slot::Live(item) => Some(item),
            Slot::Dead { .. } => None,
        }
    }

    /// Number of live items.
    pub const fn len(&self) -> usize {
        self.live
    }

    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Slots ever allocated, live or dead.
    pub fn capacity_used(&self) -> usize {
        self.slots.len()
    }
}

/// Shadow metadata shared by every triangle of a surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraceInfo {
    pub shader:        ShaderKey,
    pub compile_flags: CompileFlags,
    pub light_image:   Option<ImageKey>,
    /// `-1` for external models.
    pub surface_num:   i32,
    pub cast_shadows:  i32,
    pub skip_grid:     bool,
}

impl TraceInfo {
    fn same_key(
        &self,
        other: &Self,
    ) -> bool {
        self.shader == other.shader
            && self.surface_num == other.surface_num
            && self.cast_shadows == other.cast_shadows
            && self.skip_grid == other.skip_grid
    }
}

/// Append-only, deduplicated `TraceInfo` storage.
#[derive(Clone, Debug, Default)]
pub struct TraceInfoTable {
    infos: Vec<TraceInfo>,
    first: usize,
}

impl TraceInfoTable {
    /// Restricts dedup to infos added from now on.
    pub fn begin_model(&mut self) {
        self.first = self.infos.len();
    }

    pub fn intern(
        &mut self,
        info: TraceInfo,
    ) -> Result<u32, TraceError> {
        let existing = self.infos[self.first..]
            .iter()
            .position(|known| known.same_key(&info))
            .map(|i| i + self.first);
        let index = existing.unwrap_or_else(|| {
            self.infos.push(info);
            self.infos.len() - 1
        });
        u32::try_from(index).map_err(|_| TraceError::PoolExhausted { pool: "trace infos" })
    }

    pub fn get(
        &self,
        index: u32,
    ) -> Option<&TraceInfo> {
        self.infos.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn into_vec(self) -> Vec<TraceInfo> {
        self.infos
    }
}
