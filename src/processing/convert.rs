//! RGBA float conversion into a round-robin staging pool

use crate::capture::CapturedFrame;
use crate::error::{Error, Result};
use crate::gpu::{DeviceMemory, GpuBackend};
use crate::ring::{Ring, RingIndex};
use crate::types::{DevicePtr, Geometry, PixelLayout, Resolution};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::sync::Arc;

enum StagingState<S> {
    Uninitialized,
    Allocated {
        resolution: Resolution,
        ring: Ring<Arc<RwLock<S>>>,
    },
    Failed(String),
}

/// Output of a conversion.
///
/// Valid until the staging pool wraps back onto this slot.
pub struct StagedFrame<S> {
    slot: Arc<RwLock<S>>,
    index: RingIndex,
    resolution: Resolution,
}

impl<S: DeviceMemory> StagedFrame<S> {
    pub fn device_ptr(&self) -> DevicePtr {
        self.slot.read().device_ptr()
    }

    pub fn index(&self) -> RingIndex {
        self.index
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Read access to the staging buffer
    pub fn read(&self) -> RwLockReadGuard<'_, S> {
        self.slot.read()
    }
}

impl<S> std::fmt::Debug for StagedFrame<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedFrame")
            .field("index", &self.index)
            .field("resolution", &self.resolution)
            .finish()
    }
}

/// Converts captured frames to RGBA float, cycling through staging buffers
pub struct ConversionAdapter<B: GpuBackend> {
    capacity: usize,
    staging: Mutex<StagingState<B::Staging>>,
}

impl<B: GpuBackend> ConversionAdapter<B> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            staging: Mutex::new(StagingState::Uninitialized),
        }
    }

    pub fn is_allocated(&self) -> bool {
        matches!(*self.staging.lock(), StagingState::Allocated { .. })
    }

    /// Convert `frame` with the kernel matching its layout.
    ///
    /// Staging buffers are allocated on the first call, sized for that
    /// frame. A failed allocation is not retried. A failed kernel leaves the
    /// staging cursor where it was.
    pub fn convert(&self, backend: &B, frame: &CapturedFrame<B::Mapped>) -> Result<StagedFrame<B::Staging>> {
        let geometry = frame.geometry();
        let layout = geometry.layout.ok_or(Error::UnsupportedDepth(geometry.depth))?;

        let mut staging = self.staging.lock();
        if matches!(*staging, StagingState::Uninitialized) {
            *staging = allocate_staging(self.capacity, &geometry, backend);
        }

        let (resolution, ring) = match &mut *staging {
            StagingState::Allocated { resolution, ring } => (*resolution, ring),
            StagingState::Failed(reason) => return Err(Error::Allocation(reason.clone())),
            StagingState::Uninitialized => {
                return Err(Error::Allocation("staging pool not allocated".into()))
            }
        };

        if geometry.pixels() > resolution.pixels() {
            return Err(Error::Conversion(format!(
                "{}x{} frame does not fit {} staging buffers",
                geometry.width, geometry.height, resolution
            )));
        }

        let index = ring.current();
        let slot = ring
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Allocation(format!("staging slot {} missing", index)))?;

        {
            let src = frame.slot().read();
            let mut dst = slot.write();
            let result = match layout {
                PixelLayout::SemiPlanar => {
                    backend.nv12_to_rgba_f32(&src, &mut dst, geometry.width, geometry.height)
                }
                PixelLayout::Packed => {
                    backend.rgb_to_rgba_f32(&src, &mut dst, geometry.width, geometry.height)
                }
            };
            result.map_err(|e| match e {
                Error::Conversion(_) => e,
                other => Error::Conversion(other.to_string()),
            })?;
        }

        ring.advance();
        tracing::trace!(
            "Converted frame {} ({:?}) into staging slot {}",
            frame.sequence(),
            layout,
            index
        );

        Ok(StagedFrame {
            slot,
            index,
            resolution: geometry.resolution(),
        })
    }
}

fn allocate_staging<B: GpuBackend>(
    capacity: usize,
    geometry: &Geometry,
    backend: &B,
) -> StagingState<B::Staging> {
    let len = geometry.rgba_f32_bytes();
    let ring = Ring::try_new(capacity, |_| {
        backend
            .alloc_staging(len)
            .map(|buffer| Arc::new(RwLock::new(buffer)))
    });

    match ring {
        Ok(ring) => {
            tracing::info!(
                "Allocated {} RGBA staging buffers ({}x{}, {} bytes each)",
                capacity,
                geometry.width,
                geometry.height,
                len
            );
            StagingState::Allocated {
                resolution: geometry.resolution(),
                ring,
            }
        }
        Err(e) => {
            tracing::error!(
                "Failed to allocate memory for {}x{} RGBA staging buffers: {}",
                geometry.width,
                geometry.height,
                e
            );
            StagingState::Failed(e.to_string())
        }
    }
}
