//! Health predicate applied to every monitor tick.

use crate::config::MonitorConfig;
use crate::instrument::QuickStatus;

/// Speed reported when the devices could not be read.
pub const FAULT_SPEED_HZ: u32 = 0;
/// Error mask reported when the devices could not be read.
pub const FAULT_ERROR_MASK: u16 = 0xFFFF;
/// Pressure reported when the devices could not be read.
pub const FAULT_PRESSURE: f64 = 9999.0;

/// What counts as a safe reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
    /// Highest acceptable pressure, inclusive.
    pub pressure_limit: f64,
    /// Required pump speed, if any.
    pub nominal_speed_hz: Option<u32>,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            pressure_limit: 1000.0,
            nominal_speed_hz: None,
        }
    }
}

impl From<&MonitorConfig> for HealthPolicy {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            pressure_limit: config.pressure_limit,
            nominal_speed_hz: config.nominal_speed_hz,
        }
    }
}

impl HealthPolicy {
    /// No error bits, pressure at or below the limit, and the nominal speed when one is required.
    ///
    /// A NaN pressure is never healthy.
    pub fn is_healthy(&self, status: &QuickStatus, pressure: f64) -> bool {
        status.error_summary.is_ok()
            && pressure <= self.pressure_limit
            && self
                .nominal_speed_hz
                .map_or(true, |hz| status.speed_hz == hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::status_word::error_summary;

    fn status(speed_hz: u32, error_mask: u16) -> QuickStatus {
        QuickStatus {
            speed_hz,
            error_mask,
            error_summary: error_summary(error_mask),
        }
    }

    #[test]
    fn test_default_limit() {
        let policy = HealthPolicy::default();
        assert!(policy.is_healthy(&status(150, 0), 1000.0));
        assert!(!policy.is_healthy(&status(150, 0), 1000.1));
        assert!(!policy.is_healthy(&status(150, 0), f64::NAN));
    }

    #[test]
    fn test_error_bits_are_unhealthy() {
        let policy = HealthPolicy::default();
        assert!(!policy.is_healthy(&status(150, 0x0002), 1.0));
    }

    #[test]
    fn test_speed_ignored_unless_configured() {
        let policy = HealthPolicy::default();
        assert!(policy.is_healthy(&status(90, 0), 1.0));

        let policy = HealthPolicy {
            nominal_speed_hz: Some(150),
            ..HealthPolicy::default()
        };
        assert!(!policy.is_healthy(&status(90, 0), 1.0));
        assert!(policy.is_healthy(&status(150, 0), 1.0));
    }

    #[test]
    fn test_from_config() {
        let config = MonitorConfig {
            default_period_secs: 1.0,
            pressure_limit: 5.0,
            nominal_speed_hz: Some(150),
        };
        let policy = HealthPolicy::from(&config);
        assert_eq!(policy.pressure_limit, 5.0);
        assert_eq!(policy.nominal_speed_hz, Some(150));
    }
}
