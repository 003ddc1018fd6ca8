//! Bridge configuration
//!
//! Every field has a default, so an empty document (or no document at all)
//! yields a working configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::router::DeliveryMode;
use crate::{Error, Result};

/// Configuration for a [`SessionController`](crate::SessionController)
///
/// # Example
///
/// ```
/// use p2pbridge_core::{BridgeConfig, DeliveryMode};
///
/// let config = BridgeConfig::default()
///     .with_stop_timeout_ms(2_000)
///     .with_initial_mode(DeliveryMode::Texture);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long a stop call may run before a timeout is reported
    pub stop_timeout_ms: u64,

    /// Prefix frames lacking a 4-byte Annex-B start code
    pub normalize_start_codes: bool,

    /// Delivery mode in effect before the first `set_mode`
    pub initial_mode: DeliveryMode,

    /// Log a debug line every N delivered frames
    pub frame_log_interval: u64,

    /// Idle time after which `is_stalled` reports true
    pub stall_threshold_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 5_000,
            normalize_start_codes: true,
            initial_mode: DeliveryMode::RawBuffer,
            frame_log_interval: 30,
            stall_threshold_ms: 3_000,
        }
    }
}

impl BridgeConfig {
    /// Load from a YAML, JSON or TOML file, chosen by extension
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents)?,
            Some("json") => Self::from_json_str(&contents)?,
            Some("toml") => toml::from_str::<Self>(&contents)?,
            other => {
                return Err(Error::config(format!(
                    "unsupported config extension {:?} for {}",
                    other,
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reject values that would disable timeouts or divide by zero
    pub fn validate(&self) -> Result<()> {
        if self.stop_timeout_ms == 0 {
            return Err(Error::config("stop_timeout_ms must be greater than zero"));
        }
        if self.frame_log_interval == 0 {
            return Err(Error::config("frame_log_interval must be greater than zero"));
        }
        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }

    /// Set the stop timeout
    pub fn with_stop_timeout_ms(mut self, ms: u64) -> Self {
        self.stop_timeout_ms = ms;
        self
    }

    /// Enable or disable start-code normalization
    pub fn with_normalize_start_codes(mut self, enabled: bool) -> Self {
        self.normalize_start_codes = enabled;
        self
    }

    /// Set the initial delivery mode
    pub fn with_initial_mode(mut self, mode: DeliveryMode) -> Self {
        self.initial_mode = mode;
        self
    }

    /// Set the frame log cadence
    pub fn with_frame_log_interval(mut self, frames: u64) -> Self {
        self.frame_log_interval = frames;
        self
    }

    /// Set the stall threshold
    pub fn with_stall_threshold_ms(mut self, ms: u64) -> Self {
        self.stall_threshold_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.stop_timeout(), Duration::from_secs(5));
        assert!(config.normalize_start_codes);
        assert_eq!(config.initial_mode, DeliveryMode::RawBuffer);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = BridgeConfig::from_yaml_str("stop_timeout_ms: 250\ninitial_mode: texture\n").unwrap();
        assert_eq!(config.stop_timeout_ms, 250);
        assert_eq!(config.initial_mode, DeliveryMode::Texture);
        assert_eq!(config.frame_log_interval, 30);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let err = BridgeConfig::default()
            .with_stop_timeout_ms(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_path_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "normalize_start_codes = false").unwrap();
        writeln!(file, "stall_threshold_ms = 1000").unwrap();

        let config = BridgeConfig::from_path(file.path()).unwrap();
        assert!(!config.normalize_start_codes);
        assert_eq!(config.stall_threshold(), Duration::from_secs(1));
    }

    #[test]
    fn test_from_path_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            BridgeConfig::from_path(file.path()),
            Err(Error::Config(_))
        ));
    }
}
