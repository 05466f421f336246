//! GPU memory and colorspace conversion seam
//!
//! The capture core never touches device APIs directly. It asks a
//! [`GpuBackend`] for zero-copy frame buffers and device-only staging
//! buffers, and for the two conversion kernels:
//! - NV12 (semi-planar) to RGBA float
//! - RGB24 (packed) to RGBA float

mod host;

pub use host::{HostBackend, HostMapped, HostStaging};

use crate::error::Result;
use crate::types::DevicePtr;

/// Host/device buffer pair backed by the same memory
pub trait MappedMemory: Send + Sync {
    /// Host view of the buffer
    fn host(&self) -> &[u8];

    /// Mutable host view, used by the ingest copy
    fn host_mut(&mut self) -> &mut [u8];

    /// Device address of the same memory
    fn device_ptr(&self) -> DevicePtr;
}

/// Device-resident buffer
pub trait DeviceMemory: Send + Sync {
    fn device_ptr(&self) -> DevicePtr;

    /// Size in bytes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Allocator plus conversion kernels for one device
pub trait GpuBackend: Send + Sync + 'static {
    type Mapped: MappedMemory + 'static;
    type Staging: DeviceMemory + 'static;

    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Allocate a zero-copy host/device buffer of `len` bytes
    fn alloc_mapped(&self, len: usize) -> Result<Self::Mapped>;

    /// Allocate a device buffer of `len` bytes
    fn alloc_staging(&self, len: usize) -> Result<Self::Staging>;

    /// Convert an NV12 frame into RGBA float (0-255 per channel)
    fn nv12_to_rgba_f32(
        &self,
        src: &Self::Mapped,
        dst: &mut Self::Staging,
        width: u32,
        height: u32,
    ) -> Result<()>;

    /// Convert a packed RGB24 frame into RGBA float (0-255 per channel)
    fn rgb_to_rgba_f32(
        &self,
        src: &Self::Mapped,
        dst: &mut Self::Staging,
        width: u32,
        height: u32,
    ) -> Result<()>;
}
