//! Host-memory reference backend
//!
//! Device pointers are plain host addresses and the kernels run on the CPU.
//! Useful on machines without a GPU, and as the ground truth for the real
//! kernels.

use crate::error::{Error, Result};
use crate::types::{DevicePtr, PixelLayout};

use super::{DeviceMemory, GpuBackend, MappedMemory};

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Zero-copy buffer: the "device" sees the host allocation directly
#[derive(Debug)]
pub struct HostMapped {
    data: Box<[u8]>,
}

impl MappedMemory for HostMapped {
    fn host(&self) -> &[u8] {
        &self.data
    }

    fn host_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn device_ptr(&self) -> DevicePtr {
        DevicePtr::new(self.data.as_ptr() as u64)
    }
}

/// RGBA float staging buffer
#[derive(Debug)]
pub struct HostStaging {
    pixels: Box<[[f32; 4]]>,
}

impl HostStaging {
    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.pixels
    }
}

impl DeviceMemory for HostStaging {
    fn device_ptr(&self) -> DevicePtr {
        DevicePtr::new(self.pixels.as_ptr() as u64)
    }

    fn len(&self) -> usize {
        self.pixels.len() * std::mem::size_of::<[f32; 4]>()
    }
}

/// CPU reference implementation of [`GpuBackend`]
#[derive(Debug, Default)]
pub struct HostBackend {
    allocation_limit: Option<usize>,
    allocated: AtomicUsize,
    mapped_allocations: AtomicU64,
    staging_allocations: AtomicU64,
    nv12_conversions: AtomicU64,
    rgb_conversions: AtomicU64,
    fail_next_conversion: AtomicBool,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse allocations once `bytes` in total have been handed out
    pub fn with_allocation_limit(mut self, bytes: usize) -> Self {
        self.allocation_limit = Some(bytes);
        self
    }

    /// Make the next kernel call report failure
    pub fn fail_next_conversion(&self) {
        self.fail_next_conversion.store(true, Ordering::SeqCst);
    }

    /// Total bytes allocated so far
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn mapped_allocations(&self) -> u64 {
        self.mapped_allocations.load(Ordering::Relaxed)
    }

    pub fn staging_allocations(&self) -> u64 {
        self.staging_allocations.load(Ordering::Relaxed)
    }

    pub fn nv12_conversions(&self) -> u64 {
        self.nv12_conversions.load(Ordering::Relaxed)
    }

    pub fn rgb_conversions(&self) -> u64 {
        self.rgb_conversions.load(Ordering::Relaxed)
    }

    fn reserve(&self, len: usize) -> Result<()> {
        let total = self.allocated.fetch_add(len, Ordering::SeqCst) + len;
        if let Some(limit) = self.allocation_limit {
            if total > limit {
                self.allocated.fetch_sub(len, Ordering::SeqCst);
                return Err(Error::Allocation(format!(
                    "host backend limit of {} bytes exceeded ({} requested)",
                    limit, len
                )));
            }
        }
        Ok(())
    }

    fn check_injected_failure(&self) -> Result<()> {
        if self.fail_next_conversion.swap(false, Ordering::SeqCst) {
            return Err(Error::Conversion("injected kernel failure".into()));
        }
        Ok(())
    }
}

fn check_sizes(
    layout: PixelLayout,
    src: &HostMapped,
    dst: &HostStaging,
    width: u32,
    height: u32,
) -> Result<()> {
    let need = layout.frame_bytes(width, height);
    if src.data.len() < need {
        return Err(Error::Conversion(format!(
            "{:?} source holds {} bytes, {}x{} needs {}",
            layout,
            src.data.len(),
            width,
            height,
            need
        )));
    }

    let pixels = width as usize * height as usize;
    if dst.pixels.len() < pixels {
        return Err(Error::Conversion(format!(
            "staging buffer holds {} pixels, {}x{} needs {}",
            dst.pixels.len(),
            width,
            height,
            pixels
        )));
    }
    Ok(())
}

#[inline]
fn clamp_channel(v: f32) -> f32 {
    v.clamp(0.0, 255.0)
}

impl GpuBackend for HostBackend {
    type Mapped = HostMapped;
    type Staging = HostStaging;

    fn name(&self) -> &'static str {
        "host"
    }

    fn alloc_mapped(&self, len: usize) -> Result<HostMapped> {
        self.reserve(len)?;
        self.mapped_allocations.fetch_add(1, Ordering::Relaxed);
        Ok(HostMapped {
            data: vec![0u8; len].into_boxed_slice(),
        })
    }

    fn alloc_staging(&self, len: usize) -> Result<HostStaging> {
        self.reserve(len)?;
        self.staging_allocations.fetch_add(1, Ordering::Relaxed);
        let pixels = len / std::mem::size_of::<[f32; 4]>();
        Ok(HostStaging {
            pixels: vec![[0.0f32; 4]; pixels].into_boxed_slice(),
        })
    }

    fn nv12_to_rgba_f32(
        &self,
        src: &HostMapped,
        dst: &mut HostStaging,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.check_injected_failure()?;
        check_sizes(PixelLayout::SemiPlanar, src, dst, width, height)?;

        let (w, h) = (width as usize, height as usize);
        let (luma, chroma) = src.data.split_at(w * h);
        let uv_stride = w.div_ceil(2) * 2;

        // BT.601 limited range
        for y in 0..h {
            for x in 0..w {
                let uv = (y / 2) * uv_stride + (x / 2) * 2;
                let c = (luma[y * w + x] as f32 - 16.0) * 1.164;
                let u = chroma[uv] as f32 - 128.0;
                let v = chroma[uv + 1] as f32 - 128.0;

                dst.pixels[y * w + x] = [
                    clamp_channel(c + 1.596 * v),
                    clamp_channel(c - 0.813 * v - 0.391 * u),
                    clamp_channel(c + 2.018 * u),
                    255.0,
                ];
            }
        }

        self.nv12_conversions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rgb_to_rgba_f32(
        &self,
        src: &HostMapped,
        dst: &mut HostStaging,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.check_injected_failure()?;
        check_sizes(PixelLayout::Packed, src, dst, width, height)?;

        let pixels = width as usize * height as usize;
        for (out, rgb) in dst.pixels[..pixels]
            .iter_mut()
            .zip(src.data.chunks_exact(3))
        {
            *out = [rgb[0] as f32, rgb[1] as f32, rgb[2] as f32, 255.0];
        }

        self.rgb_conversions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped(bytes: &[u8]) -> HostMapped {
        HostMapped {
            data: bytes.to_vec().into_boxed_slice(),
        }
    }

    #[test]
    fn test_zero_copy_pointer_is_host_address() {
        let backend = HostBackend::new();
        let buf = backend.alloc_mapped(64).unwrap();
        assert_eq!(buf.device_ptr().addr(), buf.host().as_ptr() as u64);
        assert_eq!(buf.host().len(), 64);
        assert_eq!(backend.mapped_allocations(), 1);
    }

    #[test]
    fn test_allocation_limit() {
        let backend = HostBackend::new().with_allocation_limit(100);
        assert!(backend.alloc_mapped(60).is_ok());
        assert!(matches!(backend.alloc_mapped(60), Err(Error::Allocation(_))));
        assert_eq!(backend.allocated_bytes(), 60);
        assert!(backend.alloc_staging(32).is_ok());
    }

    #[test]
    fn test_rgb_conversion() {
        let backend = HostBackend::new();
        let src = mapped(&[10, 20, 30, 40, 50, 60]);
        let mut dst = backend.alloc_staging(2 * 16).unwrap();
        backend.rgb_to_rgba_f32(&src, &mut dst, 2, 1).unwrap();
        assert_eq!(dst.pixels()[0], [10.0, 20.0, 30.0, 255.0]);
        assert_eq!(dst.pixels()[1], [40.0, 50.0, 60.0, 255.0]);
        assert_eq!(backend.rgb_conversions(), 1);
        assert_eq!(backend.nv12_conversions(), 0);
    }

    #[test]
    fn test_nv12_black_and_white() {
        let backend = HostBackend::new();
        // 2x2 luma, one UV pair
        let src = mapped(&[16, 16, 235, 235, 128, 128]);
        let mut dst = backend.alloc_staging(4 * 16).unwrap();
        backend.nv12_to_rgba_f32(&src, &mut dst, 2, 2).unwrap();

        for px in &dst.pixels()[..2] {
            assert_eq!(*px, [0.0, 0.0, 0.0, 255.0]);
        }
        for px in &dst.pixels()[2..] {
            for channel in &px[..3] {
                assert!((channel - 255.0).abs() < 0.5, "{:?}", px);
            }
        }
        assert_eq!(backend.nv12_conversions(), 1);
    }

    #[test]
    fn test_short_source_rejected() {
        let backend = HostBackend::new();
        let src = mapped(&[0; 5]);
        let mut dst = backend.alloc_staging(4 * 16).unwrap();
        assert!(matches!(
            backend.nv12_to_rgba_f32(&src, &mut dst, 2, 2),
            Err(Error::Conversion(_))
        ));
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let backend = HostBackend::new();
        let src = mapped(&[1, 2, 3]);
        let mut dst = backend.alloc_staging(16).unwrap();
        backend.fail_next_conversion();
        assert!(backend.rgb_to_rgba_f32(&src, &mut dst, 1, 1).is_err());
        assert!(backend.rgb_to_rgba_f32(&src, &mut dst, 1, 1).is_ok());
    }
}
