//! Configuration profiles.
//!
//! A profile file is a TOML document mapping profile names to a capture
//! filter plus one table per module:
//!
//! ```toml
//! [flaky-wifi]
//! filter = "udp"
//!
//! [flaky-wifi.lag]
//! enabled = true
//! chance = 100.0
//! lag_time = 150
//!
//! [flaky-wifi.drop]
//! enabled = true
//! chance = 5.0
//! inbound = false
//! ```
//!
//! The engine itself never parses TOML; it only consumes the resulting
//! [`ModuleConfig`] tables through each module's `apply_config`.

use std::{collections::HashMap, path::Path};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Per-module settings, as found in a profile table.
///
/// Every module reads the subset of fields it cares about. Values are
/// clamped on application, never rejected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub enabled: bool,
    pub inbound: bool,
    pub outbound: bool,
    /// Per-record effect probability in percent.
    pub chance: f32,
    /// Lag delay in milliseconds.
    pub lag_time: u64,
    /// Throttle window length in milliseconds.
    pub timeframe: u64,
    /// Whether a throttle flush discards the batch instead of releasing it.
    pub drop_throttled: bool,
    /// Bandwidth cap in KiB/s. Zero drops all eligible traffic, negative
    /// leaves the module inert.
    pub limit: i64,
    /// Extra copies inserted per duplicated record.
    pub count: i64,
    /// Bits flipped per tampered record.
    pub max_bit_flips: u32,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            inbound: true,
            outbound: true,
            chance: 10.0,
            lag_time: 200,
            timeframe: 200,
            drop_throttled: false,
            limit: 10,
            count: 1,
            max_bit_flips: 1,
        }
    }
}

/// One named profile: a capture filter plus per-module configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    /// The driver filter expression this profile captures with.
    #[serde(default)]
    pub filter: String,
    /// Module name to configuration table.
    #[serde(flatten)]
    pub modules: HashMap<String, ModuleConfig>,
}

/// Loads every profile from a TOML file.
pub fn load_profiles(path: impl AsRef<Path>) -> Result<HashMap<String, Profile>, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    parse_profiles(&raw)
}

/// Parses profiles from a TOML document.
pub fn parse_profiles(raw: &str) -> Result<HashMap<String, Profile>, ConfigError> {
    Ok(toml::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_profiles_with_partial_tables() {
        let profiles = parse_profiles(
            r#"
            [wifi]
            filter = "udp and outbound"

            [wifi.lag]
            enabled = true
            chance = 100.0
            lag_time = 150

            [wifi.drop]
            chance = 5.0
            inbound = false

            [lan]
            filter = "tcp"
            "#,
        )
        .unwrap();

        let wifi = &profiles["wifi"];
        assert_eq!(wifi.filter, "udp and outbound");

        let lag = &wifi.modules["lag"];
        assert!(lag.enabled);
        assert_eq!(lag.lag_time, 150);
        // Unset fields fall back to defaults.
        assert_eq!(lag.timeframe, 200);

        let drop = &wifi.modules["drop"];
        assert!(!drop.enabled);
        assert!(!drop.inbound && drop.outbound);

        assert!(profiles["lan"].modules.is_empty());
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(parse_profiles("[broken"), Err(ConfigError::Parse(_))));
    }
}
