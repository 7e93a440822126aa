//! Configuration options for the NCI engine

use std::time::Duration;

use nexum_nci_core::constants::{MAX_PACKET_PAYLOAD, host, routing};
use nexum_nci_core::types::MappingConfig;

use crate::{Error, Result};

/// Default command watchdog timeout
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Default window collapsing NFCEE discovery requests
pub const DEFAULT_NFCEE_DEBOUNCE: Duration = Duration::from_secs(1);

/// Default limit on a reassembled message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Configuration options for the NCI engine
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct NciConfig {
    /// Time to wait for a response before the watchdog fires
    #[cfg_attr(feature = "serde", serde(with = "duration_ms", rename = "command_timeout_ms"))]
    pub command_timeout: Duration,

    /// Quiet period after an NFCEE discovery request before discovery restarts
    #[cfg_attr(feature = "serde", serde(with = "duration_ms", rename = "nfcee_debounce_ms"))]
    pub nfcee_debounce: Duration,

    /// Control packet payload limit used until CORE_INIT negotiates a smaller one
    pub max_control_packet_size: usize,

    /// Largest message accepted by reassembly
    pub max_message_size: usize,

    /// Whether START resets the controller configuration
    pub reset_config: bool,

    /// Whether START enables NFCEE discovery
    pub nfcee_discovery: bool,

    /// Protocol to interface mapping sent during START
    #[cfg_attr(feature = "serde", serde(skip, default = "MappingConfig::default_map"))]
    pub discover_map: Vec<MappingConfig>,

    /// Listen-mode routing priority, highest priority first
    pub host_priority: Vec<u8>,

    /// Power state byte of generated routing entries
    pub listen_power_state: u8,
}

impl Default for NciConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            nfcee_debounce: DEFAULT_NFCEE_DEBOUNCE,
            max_control_packet_size: MAX_PACKET_PAYLOAD,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            reset_config: true,
            nfcee_discovery: true,
            discover_map: MappingConfig::default_map(),
            host_priority: vec![host::DH],
            listen_power_state: routing::POWER_SWITCHED_ON,
        }
    }
}

impl NciConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the command watchdog timeout
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the NFCEE request debounce window
    pub const fn with_nfcee_debounce(mut self, debounce: Duration) -> Self {
        self.nfcee_debounce = debounce;
        self
    }

    /// Set the initial control packet payload limit
    pub const fn with_max_control_packet_size(mut self, size: usize) -> Self {
        self.max_control_packet_size = size;
        self
    }

    /// Set the reassembly limit
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set whether START resets the controller configuration
    pub const fn with_reset_config(mut self, reset_config: bool) -> Self {
        self.reset_config = reset_config;
        self
    }

    /// Set whether START enables NFCEE discovery
    pub const fn with_nfcee_discovery(mut self, enable: bool) -> Self {
        self.nfcee_discovery = enable;
        self
    }

    /// Set the discovery map sent during START
    pub fn with_discover_map(mut self, map: Vec<MappingConfig>) -> Self {
        self.discover_map = map;
        self
    }

    /// Set the listen-mode routing priority, highest first
    pub fn with_host_priority(mut self, hosts: Vec<u8>) -> Self {
        self.host_priority = hosts;
        self
    }

    /// Check the configuration for values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout.is_zero() {
            return Err(Error::config("command_timeout must be greater than zero"));
        }
        if self.max_control_packet_size == 0 || self.max_control_packet_size > MAX_PACKET_PAYLOAD {
            return Err(Error::config(format!(
                "max_control_packet_size must be between 1 and {MAX_PACKET_PAYLOAD}, got {}",
                self.max_control_packet_size
            )));
        }
        if self.max_message_size == 0 {
            return Err(Error::config("max_message_size must be greater than zero"));
        }
        let mut seen = Vec::with_capacity(self.host_priority.len());
        for host in &self.host_priority {
            if seen.contains(host) {
                return Err(Error::config(format!(
                    "host {host:#04x} listed twice in host_priority"
                )));
            }
            seen.push(*host);
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl NciConfig {
    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Serialize the configuration to TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::config(e.to_string()))
    }
}

#[cfg(feature = "serde")]
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
