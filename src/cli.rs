//! Command-line overrides layered over the TOML-persisted `AppConfig`.
//!
//! Precedence follows the teacher's `ConfigManager` convention: load the file (or
//! bootstrap defaults), then apply any CLI flag the user actually passed.

use clap::Parser;

use crate::codec::{BitDepth, Endianness};
use crate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "anc-core", about = "Adaptive active-noise-cancellation engine")]
pub struct Cli {
    /// MQTT broker hostname
    #[arg(long)]
    pub broker_host: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    pub broker_port: Option<u16>,

    /// MQTT client id prefix (a process id is appended)
    #[arg(long)]
    pub client_id_prefix: Option<String>,

    /// Reference-microphone topic
    #[arg(long)]
    pub topic_reference: Option<String>,

    /// Error-microphone topic
    #[arg(long)]
    pub topic_error: Option<String>,

    /// Anti-noise output topic
    #[arg(long)]
    pub topic_processed: Option<String>,

    /// Samples per chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Adaptive filter length in taps
    #[arg(long)]
    pub filter_length: Option<usize>,

    /// PCM bit depth: 16 or 32
    #[arg(long)]
    pub bit_depth: Option<u8>,

    /// PCM byte order: little or big
    #[arg(long)]
    pub endianness: Option<String>,

    /// Whether samples are normalised to [-1, 1] on the wire
    #[arg(long)]
    pub normalize: Option<bool>,

    /// Fixed per-sample latency compensation
    #[arg(long)]
    pub latency_samples: Option<usize>,
}

impl Cli {
    /// Apply every flag the caller actually supplied on top of `config`, leaving
    /// unset fields untouched.
    pub fn apply(&self, mut config: AppConfig) -> AppConfig {
        if let Some(host) = &self.broker_host {
            config.broker.host = host.clone();
        }
        if let Some(port) = self.broker_port {
            config.broker.port = port;
        }
        if let Some(prefix) = &self.client_id_prefix {
            config.broker.client_id_prefix = prefix.clone();
        }
        if let Some(topic) = &self.topic_reference {
            config.broker.topic_reference = topic.clone();
        }
        if let Some(topic) = &self.topic_error {
            config.broker.topic_error = topic.clone();
        }
        if let Some(topic) = &self.topic_processed {
            config.broker.topic_processed = topic.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.engine.chunk_size = chunk_size;
        }
        if let Some(filter_length) = self.filter_length {
            config.engine.filter.filter_length = filter_length;
        }
        if let Some(bit_depth) = self.bit_depth {
            config.engine.bit_depth = match bit_depth {
                32 => BitDepth::ThirtyTwo,
                _ => BitDepth::Sixteen,
            };
        }
        if let Some(endianness) = &self.endianness {
            config.engine.endianness = match endianness.to_lowercase().as_str() {
                "big" => Endianness::Big,
                _ => Endianness::Little,
            };
        }
        if let Some(normalize) = self.normalize {
            config.engine.normalize = normalize;
        }
        if let Some(latency) = self.latency_samples {
            config.engine.filter.latency_samples = latency;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            broker_host: None,
            broker_port: None,
            client_id_prefix: None,
            topic_reference: None,
            topic_error: None,
            topic_processed: None,
            chunk_size: None,
            filter_length: None,
            bit_depth: None,
            endianness: None,
            normalize: None,
            latency_samples: None,
        }
    }

    #[test]
    fn unset_flags_leave_defaults_untouched() {
        let cli = base_cli();
        let config = cli.apply(AppConfig::default());
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn every_overridable_field_takes_precedence_when_set() {
        let cli = Cli {
            broker_host: Some("broker.example".to_string()),
            broker_port: Some(8883),
            client_id_prefix: Some("custom".to_string()),
            topic_reference: Some("x/ref".to_string()),
            topic_error: Some("x/err".to_string()),
            topic_processed: Some("x/out".to_string()),
            chunk_size: Some(512),
            filter_length: Some(4096),
            bit_depth: Some(32),
            endianness: Some("big".to_string()),
            normalize: Some(false),
            latency_samples: Some(64),
        };
        let config = cli.apply(AppConfig::default());

        assert_eq!(config.broker.host, "broker.example");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.broker.client_id_prefix, "custom");
        assert_eq!(config.broker.topic_reference, "x/ref");
        assert_eq!(config.broker.topic_error, "x/err");
        assert_eq!(config.broker.topic_processed, "x/out");
        assert_eq!(config.engine.chunk_size, 512);
        assert_eq!(config.engine.filter.filter_length, 4096);
        assert_eq!(config.engine.bit_depth, BitDepth::ThirtyTwo);
        assert_eq!(config.engine.endianness, Endianness::Big);
        assert!(!config.engine.normalize);
        assert_eq!(config.engine.filter.latency_samples, 64);
    }
}
