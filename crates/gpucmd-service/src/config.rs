//! Service configuration.
//!
//! Every struct deserialises from JSON with all fields optional; missing
//! fields take the `Default` values below.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecoderConfig {
    /// Log every decoded command at `trace` level.
    pub debug: bool,
    /// Commands processed per scheduler slice before yielding to the channel.
    pub commands_per_batch: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            debug: false,
            commands_per_batch: 1000,
        }
    }
}

/// Limits and features of a share group. `None` means "ask the driver".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextGroupConfig {
    pub max_texture_units_override: Option<u32>,
    pub max_vertex_attribs_override: Option<u32>,
    pub allow_npot: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Transfer buffer ids per command buffer, `1..=max_transfer_buffers`.
    pub max_transfer_buffers: u32,
    /// Largest ring a client may register.
    pub max_ring_buffer_bytes: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_transfer_buffers: 1024,
            max_ring_buffer_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub decoder: DecoderConfig,
    pub context_group: ContextGroupConfig,
    pub channel: ChannelConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid service config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("commands_per_batch must be at least 1")]
    ZeroBatch,
    #[error("max_transfer_buffers must be at least 1")]
    NoTransferBuffers,
}

impl ServiceConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decoder.commands_per_batch == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if self.channel.max_transfer_buffers == 0 {
            return Err(ConfigError::NoTransferBuffers);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            ServiceConfig::from_json_str(r#"{"decoder": {"debug": true}, "context_group": {"allow_npot": false}}"#)
                .unwrap();
        assert_eq!(
            config,
            ServiceConfig {
                decoder: DecoderConfig {
                    debug: true,
                    ..DecoderConfig::default()
                },
                context_group: ContextGroupConfig {
                    allow_npot: Some(false),
                    ..ContextGroupConfig::default()
                },
                channel: ChannelConfig::default(),
            }
        );
    }

    #[test]
    fn rejects_unknown_fields_and_zero_batch() {
        assert!(matches!(
            ServiceConfig::from_json_str(r#"{"bogus": 1}"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ServiceConfig::from_json_str(r#"{"decoder": {"commands_per_batch": 0}}"#),
            Err(ConfigError::ZeroBatch)
        ));
    }
}
