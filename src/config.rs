//! Persisted engine configuration: TOML on disk under the platform config directory,
//! defaults on first run, overridable from the CLI.
//!
//! Structure and load/save behaviour mirror the teacher's `ConfigManager` almost
//! directly; only the settings themselves have changed from voice-call tuning knobs to
//! ANC engine constants.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::adaptive_filter::FilterConfig;
use crate::codec::{BitDepth, CodecConfig, Endianness};

/// Audio/filter/gating constants from §3 of the specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub chunk_size: usize,
    pub bit_depth: BitDepth,
    pub endianness: Endianness,
    pub normalize: bool,
    pub max_amplitude: f64,
    pub filter: FilterConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_size: 256,
            bit_depth: BitDepth::Sixteen,
            endianness: Endianness::Little,
            normalize: true,
            max_amplitude: 32_767.0,
            filter: FilterConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn to_codec_config(&self) -> CodecConfig {
        CodecConfig {
            bit_depth: self.bit_depth,
            endianness: self.endianness,
            normalize: self.normalize,
            max_amplitude: self.max_amplitude,
        }
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id_prefix: String,
    pub topic_reference: String,
    pub topic_error: String,
    pub topic_processed: String,
    pub connect_timeout_ms: u64,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id_prefix: "anc-core".to_string(),
            topic_reference: "esp32/audio_ref".to_string(),
            topic_error: "esp32/audio_error".to_string(),
            topic_processed: "esp32/audio_processed".to_string(),
            connect_timeout_ms: 10_000,
            reconnect_initial_delay_ms: 1_000,
            reconnect_max_delay_ms: 32_000,
        }
    }
}

/// Persistent application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub broker: BrokerConfig,
}

pub struct ConfigManager {
    config_path: PathBuf,
    config: AppConfig,
}

impl ConfigManager {
    pub fn with_config(config: AppConfig) -> Self {
        Self {
            config_path: PathBuf::from("fallback_config.toml"),
            config,
        }
    }

    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        let config = Self::load_or_create_config(&config_path)?;

        Ok(Self { config_path, config })
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn update_config(&mut self, config: AppConfig) -> Result<()> {
        self.config = config;
        self.save_config()
    }

    pub fn save_config(&self) -> Result<()> {
        Self::save_config_to_path(&self.config, &self.config_path)
    }

    fn load_or_create_config(config_path: &PathBuf) -> Result<AppConfig> {
        if config_path.exists() {
            info!("Loading configuration from: {:?}", config_path);
            let config_str =
                fs::read_to_string(config_path).context("Failed to read configuration file")?;

            match toml::from_str::<AppConfig>(&config_str) {
                Ok(config) => {
                    info!("Configuration loaded successfully");
                    Ok(config)
                }
                Err(e) => {
                    warn!("Failed to parse configuration file: {}. Using defaults.", e);
                    let default_config = AppConfig::default();
                    Self::save_config_to_path(&default_config, config_path)?;
                    Ok(default_config)
                }
            }
        } else {
            info!("No configuration file found. Creating default configuration.");
            let default_config = AppConfig::default();
            Self::save_config_to_path(&default_config, config_path)?;
            Ok(default_config)
        }
    }

    fn save_config_to_path(config: &AppConfig, path: &PathBuf) -> Result<()> {
        let config_str =
            toml::to_string_pretty(config).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        fs::write(path, config_str).context("Failed to write configuration file")?;

        info!("Configuration saved to: {:?}", path);
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("anc-core")
        } else {
            let home_dir = dirs::home_dir().context("Could not determine home directory")?;
            home_dir.join(".anc-core")
        };

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = AppConfig::default();
        let serialized = toml::to_string_pretty(&config).expect("serialize");
        let deserialized: AppConfig = toml::from_str(&serialized).expect("deserialize");

        assert_eq!(config.engine.chunk_size, deserialized.engine.chunk_size);
        assert_eq!(config.engine.filter.filter_length, deserialized.engine.filter.filter_length);
        assert_eq!(config.broker.host, deserialized.broker.host);
        assert_eq!(config.broker.topic_reference, deserialized.broker.topic_reference);
    }

    #[test]
    fn manager_with_config_uses_supplied_values_without_touching_disk() {
        let mut custom = AppConfig::default();
        custom.broker.host = "broker.example".to_string();
        let manager = ConfigManager::with_config(custom);
        assert_eq!(manager.get_config().broker.host, "broker.example");
    }

    #[test]
    fn absent_config_file_bootstraps_defaults_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        assert!(!path.exists());

        let loaded = ConfigManager::load_or_create_config(&path).expect("load_or_create_config");
        assert_eq!(loaded.engine.chunk_size, EngineConfig::default().chunk_size);
        assert!(path.exists(), "default config should have been written to disk");
    }

    #[test]
    fn corrupt_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "not valid toml {{{").expect("write corrupt file");

        let loaded = ConfigManager::load_or_create_config(&path).expect("load_or_create_config");
        assert_eq!(loaded.engine.chunk_size, EngineConfig::default().chunk_size);
    }

    #[test]
    fn update_config_persists_to_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let mut manager = ConfigManager {
            config_path: path.clone(),
            config: AppConfig::default(),
        };

        let mut updated = AppConfig::default();
        updated.broker.port = 18_830;
        manager.update_config(updated).expect("update_config");

        let reloaded = ConfigManager::load_or_create_config(&path).expect("reload");
        assert_eq!(reloaded.broker.port, 18_830);
    }
}
