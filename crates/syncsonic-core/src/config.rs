//! Daemon configuration read from the environment.
//!
//! Only two inputs are required by the deployment (the reserved controller
//! name and the debug artifact directory); the remaining knobs expose
//! behaviors the source materials left open rather than choosing silently.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// How linear volume 0..=100 maps onto the sound-server's channel volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeCurve {
    /// Split across channels by the balance weighting.
    BalanceWeighted,
    /// Apply the raw percentage to both channels; ignore balance.
    Raw,
}

/// How long the `allowed` whitelist of a Connect request stays in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowedScope {
    /// Only for the Connect that carried it.
    Connect,
    /// Accumulated and enforced until the phone session ends.
    Session,
}

/// Immutable daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Controller reserved for BLE advertising (e.g. `hci0`). When unset
    /// the inventory falls back to the first UART-bus adapter.
    pub reserved_hci: Option<String>,
    /// Directory for ultrasonic debug bundles.
    pub debug_dir: PathBuf,
    pub volume_curve: VolumeCurve,
    pub allowed_scope: AllowedScope,
    /// How long the reserved adapter stays pairable after a
    /// start-classic-pairing request. Zero disables the window.
    pub pairing_window: Duration,
    /// Minimum |delta| in milliseconds that triggers a latency correction.
    pub min_sync_step_ms: f64,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let reserved_hci = env::var("RESERVED_HCI").ok().filter(|v| !v.is_empty());

        let debug_dir = env::var("SYNCSONIC_DEBUG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("syncsonic_debug"));

        let volume_curve = match env::var("SYNCSONIC_VOLUME_CURVE").as_deref() {
            Ok("raw") => VolumeCurve::Raw,
            Ok("balance-weighted") | Err(_) => VolumeCurve::BalanceWeighted,
            Ok(other) => {
                return Err(ConfigError::InvalidValue {
                    var: "SYNCSONIC_VOLUME_CURVE",
                    value: other.to_string(),
                })
            }
        };

        let allowed_scope = match env::var("SYNCSONIC_ALLOWED_SCOPE").as_deref() {
            Ok("session") => AllowedScope::Session,
            Ok("connect") | Err(_) => AllowedScope::Connect,
            Ok(other) => {
                return Err(ConfigError::InvalidValue {
                    var: "SYNCSONIC_ALLOWED_SCOPE",
                    value: other.to_string(),
                })
            }
        };

        let pairing_window = match env::var("SYNCSONIC_PAIRING_WINDOW_SECS") {
            Ok(raw) => Duration::from_secs(raw.parse().map_err(|_| {
                ConfigError::InvalidValue {
                    var: "SYNCSONIC_PAIRING_WINDOW_SECS",
                    value: raw.clone(),
                }
            })?),
            Err(_) => Duration::from_secs(60),
        };

        let min_sync_step_ms = match env::var("SYNCSONIC_MIN_SYNC_STEP_MS") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                var: "SYNCSONIC_MIN_SYNC_STEP_MS",
                value: raw.clone(),
            })?,
            Err(_) => 0.5,
        };

        Ok(Self {
            reserved_hci,
            debug_dir,
            volume_curve,
            allowed_scope,
            pairing_window,
            min_sync_step_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment-variable tests mutate process state, so everything runs
    // in one test to avoid interleaving with parallel tests.
    #[test]
    fn from_env_round_trip() {
        env::remove_var("RESERVED_HCI");
        assert_eq!(Config::from_env().unwrap().reserved_hci, None);

        env::set_var("RESERVED_HCI", "hci1");
        env::remove_var("SYNCSONIC_DEBUG_DIR");
        env::remove_var("SYNCSONIC_VOLUME_CURVE");
        env::remove_var("SYNCSONIC_ALLOWED_SCOPE");
        env::remove_var("SYNCSONIC_PAIRING_WINDOW_SECS");
        env::remove_var("SYNCSONIC_MIN_SYNC_STEP_MS");

        let config = Config::from_env().unwrap();
        assert_eq!(config.reserved_hci.as_deref(), Some("hci1"));
        assert_eq!(config.volume_curve, VolumeCurve::BalanceWeighted);
        assert_eq!(config.allowed_scope, AllowedScope::Connect);
        assert_eq!(config.pairing_window, Duration::from_secs(60));
        assert!(config.debug_dir.ends_with("syncsonic_debug"));

        env::set_var("SYNCSONIC_VOLUME_CURVE", "raw");
        env::set_var("SYNCSONIC_ALLOWED_SCOPE", "session");
        env::set_var("SYNCSONIC_PAIRING_WINDOW_SECS", "0");
        env::set_var("SYNCSONIC_MIN_SYNC_STEP_MS", "2.5");
        let config = Config::from_env().unwrap();
        assert_eq!(config.volume_curve, VolumeCurve::Raw);
        assert_eq!(config.allowed_scope, AllowedScope::Session);
        assert_eq!(config.pairing_window, Duration::ZERO);
        assert!((config.min_sync_step_ms - 2.5).abs() < f64::EPSILON);

        env::set_var("SYNCSONIC_VOLUME_CURVE", "loud");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue { var: "SYNCSONIC_VOLUME_CURVE", .. })
        ));

        // Leave the environment clean for other tests.
        env::remove_var("RESERVED_HCI");
        env::remove_var("SYNCSONIC_VOLUME_CURVE");
        env::remove_var("SYNCSONIC_ALLOWED_SCOPE");
        env::remove_var("SYNCSONIC_PAIRING_WINDOW_SECS");
        env::remove_var("SYNCSONIC_MIN_SYNC_STEP_MS");
    }
}
