//! Generational slot pool for invocation records and spawn counters.
//!
//! Vacated slots go onto a free list and are handed out again by the next
//! insert with a bumped generation, so a stale [`ArenaIndex`] can never alias
//! the record that reused its slot.

use core::fmt;

/// Slot index plus generation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArenaIndex {
    slot: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Builds an index from raw parts.
    #[must_use]
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Raw slot position.
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.slot
    }

    /// Generation the slot had when this index was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.slot, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    generation: u32,
    next_free: Option<u32>,
}

/// Pool of `T` addressed by [`ArenaIndex`].
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
    reused: u64,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<T> Arena<T> {
    /// Empty pool with room for `capacity` values before growing.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
            reused: 0,
        }
    }

    /// Number of live values.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when no value is live.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// How many inserts were served from the free list.
    #[must_use]
    pub const fn reused(&self) -> u64 {
        self.reused
    }

    /// Inserts a value built from its own index.
    pub fn insert_with<F>(&mut self, build: F) -> ArenaIndex
    where
        F: FnOnce(ArenaIndex) -> T,
    {
        self.len += 1;
        if let Some(slot) = self.free_head {
            let entry = &mut self.slots[slot as usize];
            let index = ArenaIndex::new(slot, entry.generation);
            self.free_head = entry.next_free.take();
            entry.value = Some(build(index));
            self.reused += 1;
            return index;
        }
        #[allow(clippy::cast_possible_truncation)]
        let index = ArenaIndex::new(self.slots.len() as u32, 0);
        self.slots.push(Slot {
            value: Some(build(index)),
            generation: 0,
            next_free: None,
        });
        index
    }

    /// Inserts a value.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.insert_with(|_| value)
    }

    /// Removes and returns the value, pushing its slot on the free list.
    pub fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        let entry = self.slots.get_mut(index.slot as usize)?;
        if entry.generation != index.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        entry.next_free = self.free_head;
        self.free_head = Some(index.slot);
        self.len -= 1;
        Some(value)
    }

    /// Shared access to a live value.
    #[must_use]
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        let entry = self.slots.get(index.slot as usize)?;
        if entry.generation == index.generation {
            entry.value.as_ref()
        } else {
            None
        }
    }

    /// Exclusive access to a live value.
    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        let entry = self.slots.get_mut(index.slot as usize)?;
        if entry.generation == index.generation {
            entry.value.as_mut()
        } else {
            None
        }
    }

    /// True when `index` still names a live value.
    #[must_use]
    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    /// Live values with their indices, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.slots.iter().enumerate().filter_map(|(slot, entry)| {
            #[allow(clippy::cast_possible_truncation)]
            let index = ArenaIndex::new(slot as u32, entry.generation);
            entry.value.as_ref().map(|value| (index, value))
        })
    }
}
