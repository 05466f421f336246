//! Frame pool
//!
//! Zero-copy frame buffers, allocated once when the first frame reveals the
//! stream geometry and reused round-robin afterwards.

use crate::error::{Error, Result};
use crate::gpu::{GpuBackend, MappedMemory};
use crate::ring::{Ring, RingIndex};
use crate::types::Geometry;

use parking_lot::RwLock;
use std::sync::Arc;

/// One pool slot, shared with the consumer holding a captured frame
pub type Slot<M> = Arc<RwLock<M>>;

enum PoolState<M> {
    /// Nothing seen yet
    Uninitialized,
    /// Every slot sized for `geometry`; never changes afterwards
    Allocated {
        geometry: Geometry,
        ring: Ring<Slot<M>>,
    },
    /// Allocation failed; the stream cannot deliver frames
    Failed(String),
}

/// Ring of host/device frame buffers
pub struct FramePool<M> {
    capacity: usize,
    state: PoolState<M>,
}

impl<M: MappedMemory> FramePool<M> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: PoolState::Uninitialized,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_allocated(&self) -> bool {
        matches!(self.state, PoolState::Allocated { .. })
    }

    /// Geometry the slots were allocated for
    pub fn geometry(&self) -> Option<Geometry> {
        match &self.state {
            PoolState::Allocated { geometry, .. } => Some(*geometry),
            _ => None,
        }
    }

    /// Copy `data` into the slot after the cursor and advance onto it.
    ///
    /// Shorthand for [`reserve_next`](Self::reserve_next), [`fill_slot`] and
    /// [`commit`](Self::commit) when the caller owns the pool outright.
    pub fn write_next<B>(&mut self, geometry: &Geometry, data: &[u8], backend: &B) -> Result<RingIndex>
    where
        B: GpuBackend<Mapped = M>,
    {
        let (index, slot) = self.reserve_next(geometry, data.len(), backend)?;
        fill_slot(&slot, index, data)?;
        self.commit(index);
        Ok(index)
    }

    /// Pick the slot after the cursor for a frame of `len` bytes.
    ///
    /// The first call allocates the pool from `geometry`. Later frames must
    /// match the allocated byte size or they are rejected. The cursor does
    /// not move until [`commit`](Self::commit).
    pub fn reserve_next<B>(&mut self, geometry: &Geometry, len: usize, backend: &B) -> Result<(RingIndex, Slot<M>)>
    where
        B: GpuBackend<Mapped = M>,
    {
        if matches!(self.state, PoolState::Uninitialized) {
            self.state = allocate(self.capacity, geometry, backend);
        }

        match &self.state {
            PoolState::Uninitialized => Err(Error::Allocation("frame pool not allocated".into())),
            PoolState::Failed(reason) => Err(Error::Allocation(reason.clone())),
            PoolState::Allocated {
                geometry: allocated,
                ring,
            } => {
                if len != allocated.size {
                    return Err(Error::GeometryMismatch {
                        expected: allocated.size,
                        actual: len,
                    });
                }

                let next = ring.next_index();
                let slot = ring
                    .get(next)
                    .cloned()
                    .ok_or_else(|| Error::Allocation(format!("ring slot {} missing", next)))?;
                Ok((next, slot))
            }
        }
    }

    /// Move the cursor onto a slot returned by `reserve_next` once it holds
    /// the new frame. Stale indices are ignored.
    pub fn commit(&mut self, index: RingIndex) {
        if let PoolState::Allocated { ring, .. } = &mut self.state {
            if ring.next_index() == index {
                ring.advance();
            }
        }
    }

    /// Shared handle to a slot
    pub fn slot(&self, index: RingIndex) -> Option<Slot<M>> {
        match &self.state {
            PoolState::Allocated { ring, .. } => ring.get(index).cloned(),
            _ => None,
        }
    }
}

/// Copy `data` into `slot` without waiting. A slot whose host view is
/// still borrowed by a consumer is left alone.
pub fn fill_slot<M: MappedMemory>(slot: &Slot<M>, index: RingIndex, data: &[u8]) -> Result<()> {
    let mut buffer = slot
        .try_write()
        .ok_or(Error::SlotInUse { index: index.get() })?;
    buffer.host_mut()[..data.len()].copy_from_slice(data);
    Ok(())
}

fn allocate<B: GpuBackend>(capacity: usize, geometry: &Geometry, backend: &B) -> PoolState<B::Mapped> {
    if geometry.size == 0 {
        tracing::error!("Refusing to allocate frame pool for zero-sized frames ({})", geometry);
        return PoolState::Failed("frame size is zero".into());
    }

    let ring = Ring::try_new(capacity, |index| {
        backend
            .alloc_mapped(geometry.size)
            .map(|buffer| Arc::new(RwLock::new(buffer)))
            .map_err(|e| {
                tracing::error!(
                    "Failed to allocate ring buffer {} ({} bytes): {}",
                    index,
                    geometry.size,
                    e
                );
                e
            })
    });

    match ring {
        Ok(ring) => {
            tracing::info!(
                "Allocated {} {} ring buffers, {} bytes each ({})",
                capacity,
                backend.name(),
                geometry.size,
                geometry
            );
            PoolState::Allocated {
                geometry: *geometry,
                ring,
            }
        }
        Err(e) => PoolState::Failed(e.to_string()),
    }
}
