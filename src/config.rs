//! Configuration types for framebridge

use crate::error::{Error, Result};
use crate::ring::DEFAULT_CAPACITY;
use crate::types::Resolution;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default launch string: a test pattern negotiated to NV12
pub const DEFAULT_PIPELINE: &str =
    "videotestsrc is-live=true ! video/x-raw,format=NV12,width=1280,height=720 ! appsink name=mysink";

/// Capture source configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// gst-launch style pipeline description ending in a named appsink
    pub pipeline: String,
    /// Name of the appsink element inside `pipeline`
    pub appsink_name: String,
    /// Number of frame pool slots
    pub ring_capacity: usize,
    /// Number of RGBA staging slots
    pub staging_capacity: usize,
    /// Resolution the pipeline is expected to negotiate; only checked
    pub expected_resolution: Option<Resolution>,
    /// Default capture timeout in milliseconds (None = wait forever)
    pub capture_timeout_ms: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            pipeline: DEFAULT_PIPELINE.to_string(),
            appsink_name: "mysink".to_string(),
            ring_capacity: DEFAULT_CAPACITY,
            staging_capacity: DEFAULT_CAPACITY,
            expected_resolution: None,
            capture_timeout_ms: None,
        }
    }
}

impl SourceConfig {
    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = pipeline.into();
        self
    }

    pub fn with_appsink_name(mut self, name: impl Into<String>) -> Self {
        self.appsink_name = name.into();
        self
    }

    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    pub fn with_staging_capacity(mut self, capacity: usize) -> Self {
        self.staging_capacity = capacity;
        self
    }

    pub fn with_expected_resolution(mut self, width: u32, height: u32) -> Self {
        self.expected_resolution = Some(Resolution::new(width, height));
        self
    }

    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Default capture timeout
    pub fn capture_timeout(&self) -> Option<Duration> {
        self.capture_timeout_ms.map(Duration::from_millis)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.ring_capacity == 0 {
            return Err(Error::Config("ring_capacity must be at least 1".into()));
        }
        if self.staging_capacity == 0 {
            return Err(Error::Config("staging_capacity must be at least 1".into()));
        }
        if self.appsink_name.trim().is_empty() {
            return Err(Error::Config("appsink_name must not be empty".into()));
        }
        if let Some(res) = self.expected_resolution {
            if res.width == 0 || res.height == 0 {
                return Err(Error::Config(format!("invalid expected resolution {}", res)));
            }
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}
