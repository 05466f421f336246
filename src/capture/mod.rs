//! Frame capture core
//!
//! Bridges the pipeline's push-driven streaming thread to a pull-driven
//! consumer:
//! - [`FramePool`]: zero-copy frame buffers, allocated on the first frame
//! - [`CaptureSync`]: latest-wins handoff with at-most-once delivery
//! - [`MappableSample`]: what the ingest callback reads from

mod ingest;
mod pool;
mod sync;

pub use ingest::{MappableSample, MappedFrame, OwnedSample, PipelineEvent, StreamCaps};
pub use pool::{fill_slot, FramePool, Slot};
pub use sync::{CaptureSync, Delivery, Fault};

use crate::error::Result;
use crate::gpu::{GpuBackend, MappedMemory};
use crate::processing::StagedFrame;
use crate::ring::RingIndex;
use crate::types::{DevicePtr, Geometry};

use parking_lot::{MappedRwLockReadGuard, RwLockReadGuard};
use std::time::Duration;

/// Trait for pull-driven frame sources
pub trait FrameSource {
    type Backend: GpuBackend;

    /// Start the stream
    fn open(&self) -> Result<()>;

    /// Stop the stream; pending and future captures end
    fn close(&self) -> Result<()>;

    /// Wait up to `timeout` for the newest frame not yet captured
    fn capture(
        &self,
        timeout: Option<Duration>,
    ) -> Result<CapturedFrame<<Self::Backend as GpuBackend>::Mapped>>;

    /// Convert a captured frame into the next RGBA float staging buffer
    fn convert(
        &self,
        frame: &CapturedFrame<<Self::Backend as GpuBackend>::Mapped>,
    ) -> Result<StagedFrame<<Self::Backend as GpuBackend>::Staging>>;

    /// Check if the stream is running
    fn is_open(&self) -> bool;

    /// Geometry of the most recent accepted frame
    fn geometry(&self) -> Option<Geometry>;
}

/// A frame returned by a successful capture.
///
/// Shares its pool slot with the producer. The contents stay valid until
/// the producer wraps around the ring onto this slot again; while a host
/// view is held, such a producer waits instead.
pub struct CapturedFrame<M> {
    slot: Slot<M>,
    index: RingIndex,
    sequence: u64,
    geometry: Geometry,
}

impl<M: MappedMemory> CapturedFrame<M> {
    pub(crate) fn new(slot: Slot<M>, delivery: Delivery, geometry: Geometry) -> Self {
        Self {
            slot,
            index: delivery.index,
            sequence: delivery.sequence,
            geometry,
        }
    }

    /// Host view of the frame bytes
    pub fn host(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        let size = self.geometry.size;
        RwLockReadGuard::map(self.slot.read(), |buffer| &buffer.host()[..size])
    }

    /// Copy of the frame bytes
    pub fn to_vec(&self) -> Vec<u8> {
        self.host().to_vec()
    }

    /// Device address of the same memory
    pub fn device_ptr(&self) -> DevicePtr {
        self.slot.read().device_ptr()
    }

    pub fn index(&self) -> RingIndex {
        self.index
    }

    /// Publish sequence number of this frame
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub(crate) fn slot(&self) -> &Slot<M> {
        &self.slot
    }
}

impl<M> std::fmt::Debug for CapturedFrame<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedFrame")
            .field("index", &self.index)
            .field("sequence", &self.sequence)
            .field("geometry", &self.geometry)
            .finish()
    }
}
