//! Configuration system

pub use serde::{Deserialize, Serialize};

use crate::frame::FramesInFlight;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Render target configuration
///
/// Frames in flight of 0 means the implementation default; any explicit
/// value is clamped to a reasonable range at build time and against the
/// surface at creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderTargetConfig {
    /// Requested frames in flight (0 = implementation default)
    pub frames_in_flight: u32,
    /// Whether to ask for the surface maximum instead of a fixed count
    pub use_surface_maximum: bool,
    /// Whether presentation should wait for vertical blank
    pub vsync: bool,
    /// Optional pipeline cache directory; `None` disables warm starts
    pub pipeline_cache_dir: Option<String>,
}

impl RenderTargetConfig {
    /// Create a configuration with default pacing
    pub fn new() -> Self {
        Self {
            frames_in_flight: 0,
            use_surface_maximum: false,
            vsync: true,
            pipeline_cache_dir: None,
        }
    }

    /// Set an explicit frames-in-flight count
    pub fn with_frames_in_flight(mut self, frames: u32) -> Self {
        self.frames_in_flight = frames.clamp(1, 8);
        self.use_surface_maximum = false;
        self
    }

    /// Request as many frames in flight as the surface supports
    pub fn with_surface_maximum(mut self) -> Self {
        self.use_surface_maximum = true;
        self
    }

    /// Enable or disable vsync
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Set the pipeline cache directory
    pub fn with_pipeline_cache_dir(mut self, dir: impl Into<String>) -> Self {
        self.pipeline_cache_dir = Some(dir.into());
        self
    }

    /// Resolve this configuration into a frames-in-flight request
    pub fn frames_in_flight(&self) -> FramesInFlight {
        if self.use_surface_maximum {
            FramesInFlight::Max
        } else if self.frames_in_flight == 0 {
            FramesInFlight::Default
        } else {
            FramesInFlight::Count(self.frames_in_flight)
        }
    }
}

impl Default for RenderTargetConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Config for RenderTargetConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::path::PathBuf;

    fn scratch_path(name: &str) -> PathBuf {
        env::temp_dir().join(format!("render_core_{}_{name}", std::process::id()))
    }

    #[test]
    fn zero_frames_resolves_to_the_default_request() {
        let config = RenderTargetConfig::new();
        assert_eq!(config.frames_in_flight(), FramesInFlight::Default);
    }

    #[test]
    fn explicit_counts_are_clamped() {
        let config = RenderTargetConfig::new().with_frames_in_flight(100);
        assert_eq!(config.frames_in_flight(), FramesInFlight::Count(8));

        let config = RenderTargetConfig::new().with_frames_in_flight(0);
        assert_eq!(config.frames_in_flight(), FramesInFlight::Count(1));
    }

    #[test]
    fn surface_maximum_overrides_the_count() {
        let config = RenderTargetConfig::new()
            .with_frames_in_flight(3)
            .with_surface_maximum();
        assert_eq!(config.frames_in_flight(), FramesInFlight::Max);
    }

    #[test]
    fn toml_round_trip() {
        let path = scratch_path("target_config.toml");
        let config = RenderTargetConfig::new()
            .with_frames_in_flight(3)
            .with_vsync(false)
            .with_pipeline_cache_dir("/tmp/pipelines");

        config.save_to_file(path.to_str().unwrap()).unwrap();
        let loaded = RenderTargetConfig::load_from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn ron_round_trip() {
        let path = scratch_path("target_config.ron");
        let config = RenderTargetConfig::new().with_frames_in_flight(2);

        config.save_to_file(path.to_str().unwrap()).unwrap();
        let loaded = RenderTargetConfig::load_from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        let config = RenderTargetConfig::new();
        assert!(matches!(
            config.save_to_file("/tmp/render_target.yaml"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
