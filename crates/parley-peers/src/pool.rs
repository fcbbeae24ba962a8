//! Free-list object pool.
//!
//! Every hot object kind (peers, connections, link cells) lives in a
//! `Pool<T>`: a growable vector of slots threaded by a free stack. Released
//! slots go back on the stack head and are handed out again on the next
//! `acquire`, so a busy server stops touching the allocator once it has
//! reached its high-water mark.
//!
//! Slots are addressed by a generational [`Key`]. Releasing a slot bumps its
//! generation, so a key held past release resolves to nothing instead of the
//! slot's next occupant.

use std::fmt;

/// Stable handle into a [`Pool`]. Encodes slot index and generation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Liveness tag carried by pooled objects.
///
/// The owning component flips it to `Live` after `acquire` and back to
/// `Dormant` once its own teardown is done; the pool refuses to take back
/// an object that is still `Live`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Liveness {
    #[default]
    Dormant,
    Live,
}

impl Liveness {
    pub fn is_live(self) -> bool {
        matches!(self, Liveness::Live)
    }
}

/// An object kind that can be recycled through a [`Pool`].
pub trait Poolable: Default {
    /// Short name used in diagnostics.
    const KIND: &'static str;

    /// Current liveness tag. Untagged kinds report `Dormant`.
    fn liveness(&self) -> Liveness {
        Liveness::Dormant
    }
}

struct Slot<T> {
    generation: u32,
    in_use: bool,
    next_free: Option<u32>,
    value: T,
}

/// Read-only pool counters for operator status reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    /// Slots ever created. Never decreases.
    pub allocated: u64,
    /// Slots currently handed out.
    pub in_use: usize,
    /// Slots sitting on the free stack.
    pub free: usize,
}

pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    free_len: usize,
    allocated: u64,
    in_use: usize,
}

impl<T: Poolable> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Poolable> Pool<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            free_len: 0,
            allocated: 0,
            in_use: 0,
        }
    }

    /// Creates a pool with `count` free slots already in place.
    pub fn with_prewarm(count: usize) -> Self {
        let mut pool = Self::new();
        pool.prewarm(count);
        pool
    }

    /// Eagerly creates `count` slots and pushes them onto the free stack so
    /// an early burst of connections does not pay for growth.
    pub fn prewarm(&mut self, count: usize) {
        self.slots.reserve(count);
        for _ in 0..count {
            let index = self.grow();
            self.push_free(index);
        }
        tracing::debug!(kind = T::KIND, count, "pool prewarmed");
    }

    /// Pops the free-stack head, growing the backing storage when the stack
    /// is empty. The returned object is in its default state with its
    /// liveness tag unset.
    pub fn acquire(&mut self) -> Key {
        let index = match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                self.free_head = slot.next_free.take();
                self.free_len -= 1;
                index
            }
            None => self.grow(),
        };

        let slot = &mut self.slots[index as usize];
        crate::invariant!(
            !slot.in_use,
            "{} slot {} handed out twice",
            T::KIND,
            index
        );
        crate::invariant!(
            !slot.value.liveness().is_live(),
            "{} slot {} on the free stack is still live",
            T::KIND,
            index
        );
        slot.in_use = true;
        self.in_use += 1;

        Key {
            index,
            generation: slot.generation,
        }
    }

    /// Returns a slot to the free stack.
    ///
    /// The caller must have cleared the liveness tag and finished its own
    /// teardown. Releasing a stale key or a live object is fatal.
    pub fn release(&mut self, key: Key) {
        let slot = match self.slots.get_mut(key.index as usize) {
            Some(slot) if slot.in_use && slot.generation == key.generation => slot,
            _ => crate::fatal!("{} release of stale key {:?}", T::KIND, key),
        };
        crate::invariant!(
            !slot.value.liveness().is_live(),
            "{} {:?} released while still live",
            T::KIND,
            key
        );

        // Drop whatever the previous occupant left behind so the next
        // acquire starts from a clean object.
        slot.value = T::default();
        slot.in_use = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.in_use -= 1;
        self.push_free(key.index);
    }

    pub fn get(&self, key: Key) -> Option<&T> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.in_use && slot.generation == key.generation)
            .map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.in_use && slot.generation == key.generation)
            .map(|slot| &mut slot.value)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated,
            in_use: self.in_use,
            free: self.free_len,
        }
    }

    fn grow(&mut self) -> u32 {
        let index = match u32::try_from(self.slots.len()) {
            Ok(index) if index < u32::MAX => index,
            _ => crate::fatal!("{} pool exhausted its index space", T::KIND),
        };
        self.slots.push(Slot {
            generation: 0,
            in_use: false,
            next_free: None,
            value: T::default(),
        });
        self.allocated += 1;
        index
    }

    fn push_free(&mut self, index: u32) {
        self.slots[index as usize].next_free = self.free_head;
        self.free_head = Some(index);
        self.free_len += 1;
    }
}
