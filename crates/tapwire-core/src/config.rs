//! Interception configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Built-in defaults (binary wire mode, lenient decoding, caching on)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use tapwire_protocol::{DecodePolicy, WireMode};

use crate::session::SpoofProfile;

/// Interception configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterceptConfig {
    /// Wire format settings.
    #[serde(default)]
    pub wire: WireConfig,

    /// Packet cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Debug logging settings.
    #[serde(default)]
    pub debug: DebugConfig,

    /// Identity rewrite profile.
    #[serde(default)]
    pub spoof: SpoofProfile,
}

/// Wire format settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireConfig {
    /// Frame encoding for the wrapped connection.
    #[serde(default)]
    pub mode: WireModeSetting,

    /// Fail on the first malformed byte instead of recovering.
    #[serde(default)]
    pub strict: bool,
}

/// Serializable wire mode selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireModeSetting {
    #[default]
    Binary,
    Text,
}

/// Packet cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache packets received from the server.
    #[serde(default = "default_true")]
    pub inbound: bool,

    /// Cache packets sent by the client.
    #[serde(default = "default_true")]
    pub outbound: bool,
}

/// Debug logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Log every decoded inbound envelope at debug level.
    #[serde(default)]
    pub log_inbound: bool,

    /// Log every outgoing envelope at debug level.
    #[serde(default)]
    pub log_outbound: bool,
}

fn default_true() -> bool {
    true
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            mode: WireModeSetting::Binary,
            strict: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            inbound: true,
            outbound: true,
        }
    }
}

impl InterceptConfig {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "tapwire.toml",
            "/etc/tapwire/tapwire.toml",
            "~/.config/tapwire/tapwire.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: InterceptConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    #[must_use]
    pub fn wire_mode(&self) -> WireMode {
        match self.wire.mode {
            WireModeSetting::Binary => WireMode::Binary,
            WireModeSetting::Text => WireMode::Text,
        }
    }

    #[must_use]
    pub fn decode_policy(&self) -> DecodePolicy {
        if self.wire.strict {
            DecodePolicy::Strict
        } else {
            DecodePolicy::Lenient
        }
    }
}
