//! Player configuration

use crate::error::{Error, Result};
use crate::types::{BackendKind, Geometry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Buffering percentages that drive the buffering notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferingThresholds {
    /// At or below this percentage a non-buffering session starts buffering
    pub low_watermark: i32,
    /// At this percentage buffering ends
    pub complete: i32,
}

impl Default for BufferingThresholds {
    fn default() -> Self {
        Self {
            low_watermark: 5,
            complete: 100,
        }
    }
}

/// Player configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Playback backend for this session
    pub backend: BackendKind,
    /// Buffering notification thresholds
    pub buffering: BufferingThresholds,
    /// Display region applied right after the display is bound
    pub initial_roi: Geometry,
    /// Extra headers sent with license server requests
    pub license_headers: HashMap<String, String>,
    /// License server request timeout in milliseconds
    pub license_timeout_ms: u64,
    /// Override for running key installation on the idle queue
    pub defer_key_install: Option<bool>,
    /// Application id forwarded to backends that require one
    pub app_id: Option<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::MediaPlayer,
            buffering: BufferingThresholds::default(),
            initial_roi: Geometry::new(0, 0, 1, 1),
            license_headers: HashMap::new(),
            license_timeout_ms: 10_000,
            defer_key_install: None,
            app_id: None,
        }
    }
}

impl PlayerConfig {
    /// Configuration for a given backend with every other field defaulted
    pub fn for_backend(backend: BackendKind) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Add a header for license requests
    pub fn with_license_header(mut self, key: &str, value: &str) -> Self {
        self.license_headers.insert(key.to_string(), value.to_string());
        self
    }

    pub fn validate(&self) -> Result<()> {
        let b = &self.buffering;
        if !(0..=100).contains(&b.low_watermark) || !(0..=100).contains(&b.complete) {
            return Err(Error::InvalidConfig(
                "buffering thresholds must be within 0..=100".into(),
            ));
        }
        if b.low_watermark >= b.complete {
            return Err(Error::InvalidConfig(format!(
                "buffering low watermark {} must be below completion {}",
                b.low_watermark, b.complete
            )));
        }
        if self.license_timeout_ms == 0 {
            return Err(Error::InvalidConfig("license timeout must be positive".into()));
        }
        if self.initial_roi.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "initial roi {} is empty",
                self.initial_roi
            )));
        }
        Ok(())
    }

    /// Whether installs run on the idle queue for this session
    pub fn defers_key_install(&self) -> bool {
        self.defer_key_install
            .unwrap_or_else(|| self.backend.defers_key_install())
    }

    pub fn license_timeout(&self) -> Duration {
        Duration::from_millis(self.license_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.buffering.low_watermark, 5);
        assert_eq!(config.buffering.complete, 100);
        assert_eq!(config.initial_roi, Geometry::new(0, 0, 1, 1));
        assert!(!config.defers_key_install());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = PlayerConfig::from_json(
            r#"{"backend": "plus_player", "buffering": {"low_watermark": 10}}"#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::PlusPlayer);
        assert_eq!(config.buffering.low_watermark, 10);
        assert_eq!(config.buffering.complete, 100);
        assert!(config.defers_key_install());
    }

    #[test]
    fn test_defer_override() {
        let mut config = PlayerConfig::for_backend(BackendKind::PlusPlayer);
        config.defer_key_install = Some(false);
        assert!(!config.defers_key_install());
    }

    #[test]
    fn test_invalid_thresholds() {
        let err = PlayerConfig::from_json(r#"{"buffering": {"low_watermark": 100}}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = PlayerConfig::from_json(r#"{"license_timeout_ms": 0}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_malformed_json() {
        let err = PlayerConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
        assert_eq!(err.error_code(), "JSON");

        // well-formed but mistyped is a parse failure too
        assert!(matches!(
            PlayerConfig::from_json(r#"{"license_timeout_ms": "soon"}"#),
            Err(Error::Json(_))
        ));
    }
}
