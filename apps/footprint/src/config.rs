//! # Configuration
//!
//! `footprint.toml` layout:
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! sweep_interval_secs = 300
//!
//! [engine]
//! stage_duration_days = 14
//! chain_duration_days = 90
//! retry = { attempts = 3, backoff_ms = 10 }
//!
//! [emissions]
//! grams_per_kwh = 475
//!
//! [wattage.desktop]
//! "Ryzen 7 5800X" = 105
//!
//! [[devices]]
//! user_id = 7
//! class = "desktop"
//! cpu = "Ryzen 7 5800X"
//! ```
//!
//! Every section is optional. Security settings (API key, rate limit, CORS)
//! come from the environment, not from this file.

use footprint_core::{
    DeviceProfile, EmissionsFactor, EngineSettings, FootprintError, ProfileDirectory, WattageTable,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "footprint.toml";

/// Largest config file accepted (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds between completion sweeps; 0 disables the sweep task.
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            sweep_interval_secs: 300,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineSettings,
    pub emissions: EmissionsFactor,
    pub wattage: WattageTable,
    pub devices: Vec<DeviceProfile>,
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, FootprintError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| FootprintError::InvalidInput(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `footprint.toml` in the
    /// working directory is used if present, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, FootprintError> {
        let path: PathBuf = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.is_file() {
                    tracing::debug!("no {} found, using defaults", DEFAULT_CONFIG_FILE);
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let metadata = std::fs::metadata(&path).map_err(|e| {
            FootprintError::Io(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(FootprintError::InvalidInput(format!(
                "Config file {} bytes exceeds maximum {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }

        let text = std::fs::read_to_string(&path).map_err(|e| {
            FootprintError::Io(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        let config = Self::from_toml(&text)?;
        tracing::info!(
            path = %path.display(),
            wattage_entries = config.wattage.len(),
            devices = config.devices.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), FootprintError> {
        if self.engine.stage_duration_days == 0 {
            return Err(FootprintError::InvalidInput(
                "engine.stage_duration_days must be at least 1".to_string(),
            ));
        }
        if self.engine.retry.attempts == 0 {
            return Err(FootprintError::InvalidInput(
                "engine.retry.attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Profile directory built from `[[devices]]`.
    #[must_use]
    pub fn profiles(&self) -> ProfileDirectory {
        ProfileDirectory::from_profiles(self.devices.iter().cloned())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use footprint_core::{DeviceClass, DevicePowerLookup, Milliwatts, UserId, UserProfiles};

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").expect("parse");
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.emissions.grams_per_kwh, 475);
        assert!(config.wattage.is_empty());
    }

    #[test]
    fn full_file_parses() {
        let text = r#"
            [server]
            port = 9090
            sweep_interval_secs = 0

            [engine]
            stage_duration_days = 7
            retry = { attempts = 5, backoff_ms = 1 }

            [emissions]
            grams_per_kwh = 233

            [wattage.desktop]
            "Ryzen 7 5800X" = 105
            "DDR4 16GB" = "6.5"

            [[devices]]
            user_id = 7
            class = "desktop"
            cpu = "Ryzen 7 5800X"
            ram = "DDR4 16GB"
        "#;
        let config = Config::from_toml(text).expect("parse");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.engine.stage_duration_days, 7);
        assert_eq!(config.engine.chain_duration_days, 90);
        assert_eq!(config.engine.retry.attempts, 5);
        assert_eq!(config.emissions.grams_per_kwh, 233);
        assert_eq!(
            config
                .wattage
                .wattage("DDR4 16GB", DeviceClass::Desktop)
                .expect("entry"),
            Milliwatts(6_500)
        );

        let device = config.profiles().active_device(UserId(7)).expect("device");
        assert_eq!(device.class, DeviceClass::Desktop);
        assert_eq!(device.gpu, None);
    }

    #[test]
    fn example_file_parses() {
        let config = Config::from_toml(include_str!("../../../footprint.example.toml"))
            .expect("example config");
        assert_eq!(config.devices.len(), 2);
        assert_eq!(
            config
                .wattage
                .wattage("LPDDR4X 16GB", DeviceClass::Laptop)
                .expect("entry"),
            Milliwatts(2_500)
        );
    }

    #[test]
    fn unknown_device_class_is_rejected() {
        let text = r#"
            [wattage.tablet]
            "A15" = 5
        "#;
        assert!(Config::from_toml(text).is_err());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let text = r#"
            [engine]
            retry = { attempts = 0 }
        "#;
        assert!(matches!(
            Config::from_toml(text),
            Err(FootprintError::InvalidInput(_))
        ));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(FootprintError::Io(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("footprint.toml");
        std::fs::write(&path, "[server]\nport = 8181\n").expect("write");
        let config = Config::load(Some(&path)).expect("load");
        assert_eq!(config.server.port, 8181);
    }
}
