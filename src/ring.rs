//! Fixed-capacity slot ring
//!
//! Backs both the raw frame pool and the RGBA staging pool. Slots are
//! created once and only addressed through [`RingIndex`], a wrapping cursor
//! that the ring itself hands out.

use crate::error::{Error, Result};

/// Default number of slots per ring
pub const DEFAULT_CAPACITY: usize = 16;

/// Position of a slot inside a [`Ring`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RingIndex(usize);

impl RingIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for RingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owned ring of pre-built slots with a wrapping cursor
#[derive(Debug)]
pub struct Ring<T> {
    slots: Box<[T]>,
    cursor: usize,
}

impl<T> Ring<T> {
    /// Build every slot up front. Fails on the first slot that can't be made.
    pub fn try_new<F>(capacity: usize, mut make: F) -> Result<Self>
    where
        F: FnMut(RingIndex) -> Result<T>,
    {
        if capacity == 0 {
            return Err(Error::Config("ring capacity must be at least 1".into()));
        }

        let slots = (0..capacity)
            .map(|n| make(RingIndex(n)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            slots: slots.into_boxed_slice(),
            cursor: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot the cursor points at
    pub fn current(&self) -> RingIndex {
        RingIndex(self.cursor)
    }

    /// Slot after the cursor, `(current + 1) mod capacity`
    pub fn next_index(&self) -> RingIndex {
        RingIndex((self.cursor + 1) % self.slots.len())
    }

    /// Move the cursor forward one slot and return its new position
    pub fn advance(&mut self) -> RingIndex {
        self.cursor = self.next_index().0;
        RingIndex(self.cursor)
    }

    /// Bounds-checked lookup; an index from a larger ring yields `None`
    pub fn get(&self, index: RingIndex) -> Option<&T> {
        self.slots.get(index.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RingIndex, &T)> {
        self.slots.iter().enumerate().map(|(n, slot)| (RingIndex(n), slot))
    }
}
