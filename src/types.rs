//! Common types used throughout framebridge

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const VGA: Self = Self::new(640, 480);
    pub const HD_720P: Self = Self::new(1280, 720);
    pub const FHD_1080P: Self = Self::new(1920, 1080);

    /// Calculate total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::HD_720P
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Memory layout of a raw frame as delivered by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelLayout {
    /// NV12 - full-resolution Y plane followed by interleaved half-resolution UV
    SemiPlanar,
    /// RGB24 - packed 8-bit triplets
    Packed,
}

impl PixelLayout {
    /// Effective bits per pixel of the layout
    pub const fn bits_per_pixel(&self) -> u32 {
        match self {
            PixelLayout::SemiPlanar => 12,
            PixelLayout::Packed => 24,
        }
    }

    /// Guess the layout from a depth derived from the buffer length
    pub fn from_depth(depth: u32) -> Option<Self> {
        match depth {
            12 => Some(PixelLayout::SemiPlanar),
            24 => Some(PixelLayout::Packed),
            _ => None,
        }
    }

    /// Map a `video/x-raw` caps format string
    pub fn from_caps_format(format: &str) -> Option<Self> {
        match format {
            "NV12" => Some(PixelLayout::SemiPlanar),
            "RGB" | "BGR" => Some(PixelLayout::Packed),
            _ => None,
        }
    }

    /// Bytes needed for a frame of this layout
    pub fn frame_bytes(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelLayout::SemiPlanar => w * h + w.div_ceil(2) * 2 * h.div_ceil(2),
            PixelLayout::Packed => w * h * 3,
        }
    }
}

impl std::fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelLayout::SemiPlanar => write!(f, "NV12"),
            PixelLayout::Packed => write!(f, "RGB24"),
        }
    }
}

/// Frame geometry as observed on the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    /// Bits per pixel, `8 * size / (width * height)`
    pub depth: u32,
    /// Total bytes per frame
    pub size: usize,
    /// Layout, when the caps or the depth identify one
    pub layout: Option<PixelLayout>,
}

impl Geometry {
    /// Derive geometry from caps dimensions and the mapped buffer length.
    ///
    /// Depth is computed from the byte count rather than the caps, since
    /// packed and semi-planar layouts differ in effective bits per pixel.
    /// A caps format string, when present, decides the layout; otherwise
    /// the depth does.
    pub fn detect(width: i32, height: i32, byte_len: usize, format: Option<&str>) -> Result<Self> {
        if width < 1 || height < 1 {
            return Err(Error::InvalidGeometry { width, height });
        }

        let (width, height) = (width as u32, height as u32);
        let pixels = width as u64 * height as u64;
        let depth = u32::try_from(byte_len as u64 * 8 / pixels).unwrap_or(u32::MAX);
        let layout = format
            .and_then(PixelLayout::from_caps_format)
            .or_else(|| PixelLayout::from_depth(depth));

        Ok(Self {
            width,
            height,
            depth,
            size: byte_len,
            layout,
        })
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Bytes of one RGBA float staging buffer for this geometry
    pub fn rgba_f32_bytes(&self) -> usize {
        self.pixels() as usize * std::mem::size_of::<[f32; 4]>()
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} @ {}bpp ({} bytes)",
            self.width, self.height, self.depth, self.size
        )
    }
}

/// Device-visible address of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePtr(u64);

impl DevicePtr {
    pub const NULL: Self = Self(0);

    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn addr(&self) -> u64 {
        self.0
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Buffers handed to the ingest callback
    pub frames_received: u64,
    /// Frames written to the pool and published
    pub frames_produced: u64,
    /// Frames rejected at ingest
    pub frames_dropped: u64,
    /// Frames returned by a successful capture
    pub frames_delivered: u64,
    /// Frames replaced by a newer one before anyone captured them
    pub frames_superseded: u64,
    /// Successful RGBA conversions
    pub conversions: u64,
}
