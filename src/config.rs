//! Configuration system using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/roughd.toml` by default)
//! 2. Environment variables (prefixed with `ROUGHD_`, sections split on `__`)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! ROUGHD_APPLICATION__LOG_LEVEL=debug
//! ROUGHD_PUMP__HOST=10.1.1.20
//! ROUGHD_MONITOR__PRESSURE_LIMIT=500
//! ```
//!
//! # Example
//!
//! ```no_run
//! use roughd::config::RoughConfig;
//!
//! let config = RoughConfig::load_from("config/roughd.toml")?;
//! println!("pump at {}:{}", config.pump.host, config.pump.port);
//! # Ok::<(), roughd::error::RoughError>(())
//! ```

use crate::error::{RoughError, RoughResult};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/roughd.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoughConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Roughing pump controller link
    pub pump: DeviceConfig,
    /// Pressure gauge link
    pub gauge: GaugeConfig,
    /// Safety monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationConfig {
    /// Instance name, reported in the startup log
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Network location of one device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Terminal server host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Connect/read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Gauge link plus its bus address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GaugeConfig {
    /// Network location
    #[serde(flatten)]
    pub link: DeviceConfig,
    /// Gauge address on its RS-485 bus (1-999)
    #[serde(default = "default_gauge_address")]
    pub address: u16,
}

/// Safety monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// Period started at launch, in seconds (0 = none)
    #[serde(default)]
    pub default_period_secs: f64,
    /// Highest pressure still considered safe
    #[serde(default = "default_pressure_limit")]
    pub pressure_limit: f64,
    /// When set, the pump must report exactly this speed to be healthy
    #[serde(default)]
    pub nominal_speed_hz: Option<u32>,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "rough".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_gauge_address() -> u16 {
    1
}

fn default_pressure_limit() -> f64 {
    1000.0
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            default_period_secs: 0.0,
            pressure_limit: default_pressure_limit(),
            nominal_speed_hz: None,
        }
    }
}

impl Default for RoughConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            pump: DeviceConfig {
                host: "localhost".to_string(),
                port: 4001,
                timeout_ms: default_timeout_ms(),
            },
            gauge: GaugeConfig {
                link: DeviceConfig {
                    host: "localhost".to_string(),
                    port: 4002,
                    timeout_ms: default_timeout_ms(),
                },
                address: default_gauge_address(),
            },
            monitor: MonitorConfig::default(),
        }
    }
}

impl DeviceConfig {
    /// Transport timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self, device: &str) -> RoughResult<()> {
        if self.host.trim().is_empty() {
            return Err(RoughError::Configuration(format!(
                "{device}: 'host' cannot be empty"
            )));
        }
        if self.port == 0 {
            return Err(RoughError::Configuration(format!(
                "{device}: 'port' must be > 0"
            )));
        }
        if self.timeout_ms == 0 {
            return Err(RoughError::Configuration(format!(
                "{device}: 'timeout_ms' must be > 0"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl RoughConfig {
    /// Load configuration from a specific file path
    ///
    /// Environment variables take precedence over the file. The result is
    /// validated before it is returned.
    ///
    /// # Errors
    ///
    /// Returns `RoughError::Config` if the sources cannot be merged or
    /// extracted, `RoughError::Configuration` if validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> RoughResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ROUGHD_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Both devices have a host, a non-zero port and a non-zero timeout
    /// - Gauge address is 1-999
    /// - Pressure limit is a positive finite number
    pub fn validate(&self) -> RoughResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(RoughError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.pump.validate("pump")?;
        self.gauge.link.validate("gauge")?;

        if !(1..=999).contains(&self.gauge.address) {
            return Err(RoughError::Configuration(format!(
                "gauge: 'address' {} out of range 1-999",
                self.gauge.address
            )));
        }

        let limit = self.monitor.pressure_limit;
        if !limit.is_finite() || limit <= 0.0 {
            return Err(RoughError::Configuration(format!(
                "monitor: 'pressure_limit' must be a positive number, got {limit}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RoughConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = RoughConfig::default();
        config.application.log_level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log_level 'loud'"));
    }

    #[test]
    fn test_empty_host_rejected() {
        let mut config = RoughConfig::default();
        config.pump.host = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(RoughError::Configuration(msg)) if msg.contains("pump")
        ));
    }

    #[test]
    fn test_gauge_address_range() {
        let mut config = RoughConfig::default();
        config.gauge.address = 1000;
        assert!(config.validate().is_err());
        config.gauge.address = 0;
        assert!(config.validate().is_err());
        config.gauge.address = 999;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pressure_limit_must_be_positive() {
        let mut config = RoughConfig::default();
        config.monitor.pressure_limit = f64::NAN;
        assert!(config.validate().is_err());
        config.monitor.pressure_limit = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_conversion() {
        let config = RoughConfig::default();
        assert_eq!(config.pump.timeout(), Duration::from_secs(1));
    }
}
