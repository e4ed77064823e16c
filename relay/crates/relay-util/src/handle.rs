//! Generation-checked handles.
//!
//! A [`NativeHandle`] addresses a slot in a [`HandleArena`] by index plus a
//! generation counter. Freeing a slot bumps its generation, so a handle that
//! outlived its object is detected instead of silently aliasing whatever
//! reused the slot.
//!
//! # Packed layout
//!
//! ```text
//! 64-bit packed handle:
//! ┌──────────────────────┬──────────────────────┐
//! │   generation (u32)   │     index (u32)      │
//! │       63-32          │        31-0          │
//! └──────────────────────┴──────────────────────┘
//! ```
//!
//! Generations start at 1, so the packed value 0 is never a live handle and
//! stands for "absent" in a command record.
//!
//! # Example
//!
//! ```
//! use relay_util::handle::HandleArena;
//!
//! let mut arena = HandleArena::new();
//! let h = arena.insert("target");
//! assert_eq!(arena.get(h), Some(&"target"));
//!
//! arena.remove(h);
//! assert!(arena.get(h).is_none());
//! ```

use crate::error::{HandleError, HandleResult};

/// Generation-checked reference to an arena slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle {
    index: u32,
    generation: u32,
}

static_assertions::assert_eq_size!(NativeHandle, u64);

impl NativeHandle {
    /// Slot index
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation the slot had when this handle was issued
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into the 8-byte form stored in command records
    #[inline]
    pub fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpack a record slot. Returns `None` for 0 or a zero generation.
    #[inline]
    pub fn from_raw(raw: u64) -> Option<Self> {
        let generation = (raw >> 32) as u32;
        if generation == 0 {
            return None;
        }
        Some(Self {
            index: raw as u32,
            generation,
        })
    }

    /// Packed form as the signed slot type used by the record layout
    #[inline]
    pub fn to_slot(handle: Option<Self>) -> i64 {
        handle.map_or(0, |h| h.to_raw() as i64)
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of values addressed by [`NativeHandle`]s
///
/// Freed slots are recycled LIFO. Each reuse hands out a new generation.
#[derive(Debug, Clone)]
pub struct HandleArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> HandleArena<T> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Create an arena with room for `capacity` live values
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Insert a value, returning its handle
    ///
    /// # Panics
    ///
    /// Panics if the arena already holds `u32::MAX` slots. Use
    /// [`try_insert`](Self::try_insert) to handle that case.
    pub fn insert(&mut self, value: T) -> NativeHandle {
        match self.try_insert(value) {
            Ok(handle) => handle,
            Err(err) => panic!("{}", err),
        }
    }

    /// Insert a value, failing when the index space is exhausted
    pub fn try_insert(&mut self, value: T) -> HandleResult<NativeHandle> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());
            slot.value = Some(value);
            self.len += 1;
            return Ok(NativeHandle {
                index,
                generation: slot.generation,
            });
        }

        if self.slots.len() >= u32::MAX as usize {
            return Err(HandleError::Exhausted {
                slots: self.slots.len(),
            });
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        self.len += 1;
        Ok(NativeHandle {
            index,
            generation: 1,
        })
    }

    /// Borrow the value behind `handle` if it is still live
    pub fn get(&self, handle: NativeHandle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Mutably borrow the value behind `handle` if it is still live
    pub fn get_mut(&mut self, handle: NativeHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Check whether `handle` refers to a live value
    pub fn contains(&self, handle: NativeHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Like [`get`](Self::get) but reports stale handles as an error
    pub fn resolve(&self, handle: NativeHandle) -> HandleResult<&T> {
        self.get(handle).ok_or(HandleError::Stale {
            index: handle.index,
            generation: handle.generation,
        })
    }

    /// Remove the value behind `handle`, invalidating every copy of the handle
    pub fn remove(&mut self, handle: NativeHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = match slot.generation.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no values are live
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop every live value, returning how many were released
    ///
    /// Generations are bumped so handles issued before the clear stay stale.
    pub fn clear(&mut self) -> usize {
        let released = self.len;
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                slot.generation = match slot.generation.wrapping_add(1) {
                    0 => 1,
                    next => next,
                };
            }
            self.free.push(index as u32);
        }
        self.len = 0;
        released
    }

    /// Iterate over live `(handle, value)` pairs in slot order
    pub fn iter(&self) -> impl Iterator<Item = (NativeHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    NativeHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_insert_and_get() {
        let mut arena = HandleArena::new();
        let a = arena.insert(10);
        let b = arena.insert(20);

        assert_eq!(arena.get(a), Some(&10));
        assert_eq!(arena.get(b), Some(&20));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut arena = HandleArena::new();
        let old = arena.insert("first");
        assert_eq!(arena.remove(old), Some("first"));

        let new = arena.insert("second");
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());

        assert!(arena.get(old).is_none());
        assert_eq!(arena.get(new), Some(&"second"));
        assert_eq!(
            arena.resolve(old),
            Err(HandleError::Stale {
                index: old.index(),
                generation: old.generation(),
            })
        );
    }

    #[test]
    fn test_double_remove_is_none() {
        let mut arena = HandleArena::new();
        let h = arena.insert(1u8);
        assert!(arena.remove(h).is_some());
        assert!(arena.remove(h).is_none());
        assert!(arena.is_empty());
    }

    #[test]
    fn test_clear_invalidates_all() {
        let mut arena = HandleArena::new();
        let handles: Vec<_> = (0..5).map(|i| arena.insert(i)).collect();
        assert_eq!(arena.clear(), 5);
        assert!(arena.is_empty());
        for h in handles {
            assert!(!arena.contains(h));
        }
        let fresh = arena.insert(99);
        assert_eq!(arena.get(fresh), Some(&99));
    }

    #[test]
    fn test_null_raw_is_absent() {
        assert_eq!(NativeHandle::from_raw(0), None);
        assert_eq!(NativeHandle::to_slot(None), 0);
    }

    #[test]
    fn test_iter_skips_freed() {
        let mut arena = HandleArena::new();
        let a = arena.insert('a');
        let b = arena.insert('b');
        let c = arena.insert('c');
        arena.remove(b);

        let live: Vec<_> = arena.iter().map(|(h, v)| (h, *v)).collect();
        assert_eq!(live, vec![(a, 'a'), (c, 'c')]);
    }

    #[quickcheck]
    fn prop_raw_roundtrip_preserves_handle(index: u32, generation: u32) -> bool {
        let generation = generation.max(1);
        let handle = NativeHandle { index, generation };
        NativeHandle::from_raw(handle.to_raw()) == Some(handle)
    }
}
