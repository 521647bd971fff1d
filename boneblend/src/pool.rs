//! Generational arena used for recycled animation objects.
//!
//! A [`Handle`] is an index plus the generation the slot had when it was borrowed. Releasing a
//! slot bumps its generation, so every handle issued before the release stops resolving and two
//! live handles can never alias the same occupant.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Objects that can be parked in a [`Pool`].
///
/// `clear` runs on release and must leave the object indistinguishable from `Default::default()`
/// apart from retained allocations.
pub trait Recycle: Default {
    fn clear(&mut self);
}

pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    live: bool,
    value: T,
}

#[derive(Debug)]
pub struct Pool<T: Recycle> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
}

impl<T: Recycle> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Recycle> Pool<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
        }
    }

    /// Hands out an exclusively owned, cleared object.
    pub fn borrow(&mut self) -> Handle<T> {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.live = true;
            return Handle::new(index, slot.generation);
        }

        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        assert!(index < u32::MAX, "pool exhausted");
        log::trace!("pool grows to {} slots", index + 1);
        self.slots.push(Slot {
            generation: 0,
            live: true,
            value: T::default(),
        });
        Handle::new(index, 0)
    }

    /// Returns the object behind `handle` to the pool.
    ///
    /// Returns `false` (and does nothing) when the handle is stale, so releasing twice is harmless.
    pub fn release(&mut self, handle: Handle<T>) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return false;
        };
        if !slot.live || slot.generation != handle.generation {
            log::warn!("ignoring release of stale pool handle {handle:?}");
            return false;
        }
        slot.value.clear();
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        true
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        let slot = self.slots.get(handle.index())?;
        if !slot.live || slot.generation != handle.generation {
            return None;
        }
        Some(&slot.value)
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index())?;
        if !slot.live || slot.generation != handle.generation {
            return None;
        }
        Some(&mut slot.value)
    }

    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.live
                .then(|| (Handle::new(i as u32, slot.generation), &slot.value))
        })
    }
}
