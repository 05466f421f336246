//! framebridge - latest-frame capture bridge
//!
//! Hands decoded video frames from a push-driven media pipeline (a
//! GStreamer appsink) to a pull-driven consumer such as an inference loop,
//! and stages them as RGBA float buffers for the GPU.
//!
//! # Features
//!
//! - **Capture**: zero-copy frame ring allocated on the first frame,
//!   latest-wins delivery with at-most-once semantics
//! - **Convert**: NV12 or RGB24 to RGBA float into a separate staging ring
//! - **Backends**: pluggable [`GpuBackend`]; [`HostBackend`] runs everywhere
//! - **GStreamer**: appsink binding behind the `gstreamer` cargo feature
//!
//! # Example
//!
//! ```rust
//! use framebridge::{HostBackend, OwnedSample, PixelLayout, Resolution, SourceConfig, VideoSource};
//! use std::time::Duration;
//!
//! fn main() -> framebridge::Result<()> {
//!     let source = VideoSource::new(SourceConfig::default(), HostBackend::new())?;
//!     source.open();
//!
//!     // normally called from the pipeline's streaming thread
//!     let sample = OwnedSample::pattern(Resolution::VGA, PixelLayout::SemiPlanar, 0);
//!     source.on_buffer(&sample)?;
//!
//!     let frame = source.capture(Some(Duration::from_millis(100)))?;
//!     let rgba = source.convert(&frame)?;
//!     println!("frame {} staged at {}", frame.sequence(), rgba.device_ptr());
//!     Ok(())
//! }
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod gpu;
#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod processing;
pub mod ring;
pub mod source;
pub mod types;

// Re-exports for convenience
pub use capture::{CapturedFrame, FrameSource, MappableSample, OwnedSample, PipelineEvent, StreamCaps};
pub use config::SourceConfig;
pub use error::{Error, Result};
pub use gpu::{DeviceMemory, GpuBackend, HostBackend, MappedMemory};
#[cfg(feature = "gstreamer")]
pub use gst::GstVideo;
pub use processing::StagedFrame;
pub use ring::{RingIndex, DEFAULT_CAPACITY};
pub use source::VideoSource;
pub use types::{DevicePtr, Geometry, PixelLayout, Resolution, Stats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if this build can drive GStreamer pipelines
pub fn has_gstreamer() -> bool {
    cfg!(feature = "gstreamer")
}
