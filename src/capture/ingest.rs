//! Ingest side: what the pipeline hands the capture core
//!
//! The streaming thread delivers a sample that can be mapped read-only and
//! carries caps. [`MappableSample`] abstracts over it so the core is the
//! same for GStreamer samples and synthetic frames.

use crate::error::{Error, Result};
use crate::types::{Geometry, PixelLayout, Resolution};

use std::ops::Deref;

/// Stream format metadata from the sample caps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCaps {
    pub width: i32,
    pub height: i32,
    /// `format` field of `video/x-raw` caps, if present
    pub format: Option<String>,
}

impl StreamCaps {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            format: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// A buffer delivered by the pipeline
pub trait MappableSample {
    /// Read-only mapping; unmapped when dropped
    type Mapping<'a>: Deref<Target = [u8]>
    where
        Self: 'a;

    fn map_readable(&self) -> Result<Self::Mapping<'_>>;

    fn stream_caps(&self) -> Result<StreamCaps>;
}

/// Owned frame bytes plus caps, used for synthetic sources and tests
#[derive(Debug, Clone)]
pub struct OwnedSample {
    data: Option<Vec<u8>>,
    caps: Option<StreamCaps>,
}

impl OwnedSample {
    pub fn new(data: Vec<u8>, caps: StreamCaps) -> Self {
        Self {
            data: Some(data),
            caps: Some(caps),
        }
    }

    /// Sample whose caps are missing
    pub fn without_caps(data: Vec<u8>) -> Self {
        Self {
            data: Some(data),
            caps: None,
        }
    }

    /// Sample whose buffer can't be mapped
    pub fn unmappable(caps: StreamCaps) -> Self {
        Self {
            data: None,
            caps: Some(caps),
        }
    }

    /// Generate a frame of the given layout filled with a byte pattern
    /// derived from `seed`
    pub fn pattern(resolution: Resolution, layout: PixelLayout, seed: u8) -> Self {
        let len = layout.frame_bytes(resolution.width, resolution.height);
        let data = (0..len)
            .map(|n| (n as u8).wrapping_mul(31).wrapping_add(seed))
            .collect();
        let format = match layout {
            PixelLayout::SemiPlanar => "NV12",
            PixelLayout::Packed => "RGB",
        };
        Self::new(
            data,
            StreamCaps::new(resolution.width as i32, resolution.height as i32).with_format(format),
        )
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }
}

impl MappableSample for OwnedSample {
    type Mapping<'a> = &'a [u8];

    fn map_readable(&self) -> Result<Self::Mapping<'_>> {
        self.data
            .as_deref()
            .ok_or_else(|| Error::Mapping("buffer could not be mapped".into()))
    }

    fn stream_caps(&self) -> Result<StreamCaps> {
        self.caps
            .clone()
            .ok_or_else(|| Error::Mapping("sample had no caps".into()))
    }
}

/// Notifications from the pipeline bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    EndOfStream,
    Error(String),
    Warning(String),
    StateChanged { from: String, to: String },
}

/// Mapped frame bytes with the geometry read from them.
///
/// Holds the mapping for as long as it lives; dropping it releases the
/// pipeline buffer on every path.
pub struct MappedFrame<'a, S: MappableSample + 'a> {
    pub geometry: Geometry,
    mapping: S::Mapping<'a>,
}

impl<'a, S: MappableSample + 'a> MappedFrame<'a, S> {
    /// Map `sample` and derive its geometry
    pub fn read(sample: &'a S) -> Result<Self> {
        let caps = sample.stream_caps()?;
        // an empty buffer is passed on; the pool decides whether it is fatal
        let mapping = sample.map_readable()?;

        let geometry = Geometry::detect(caps.width, caps.height, mapping.len(), caps.format.as_deref())?;
        Ok(Self { geometry, mapping })
    }

    pub fn data(&self) -> &[u8] {
        &self.mapping
    }
}
