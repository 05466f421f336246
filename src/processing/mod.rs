//! Frame processing module
//!
//! Converts captured NV12 or RGB24 frames into RGBA float buffers for
//! downstream inference, through a ring of staging buffers that is
//! independent of the capture pool.

mod convert;

pub use convert::{ConversionAdapter, StagedFrame};
