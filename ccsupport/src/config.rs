//! Configuration for the chaincode broker.

use std::path::PathBuf;
use std::time::Duration;

use ccsupport_shared::constants::{env, timeouts};
use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};
use serde::{Deserialize, Serialize};

// ============================================================================
// Init Policy
// ============================================================================

/// How the broker treats INIT versus TRANSACTION requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPolicy {
    /// The caller decides; the broker forwards whatever kind it is asked to.
    #[default]
    Unchecked,

    /// Per handler and channel: exactly one successful INIT, and no
    /// TRANSACTION before it.
    ExactlyOnce,
}

// ============================================================================
// Logging Options
// ============================================================================

/// Logging options for the broker and the chaincodes it launches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling log files. Logs go to stderr when unset.
    #[serde(default)]
    pub file_dir: Option<PathBuf>,

    /// Application log level handed to chaincodes.
    #[serde(default = "default_log_level")]
    pub chaincode_level: String,

    /// Shim log level handed to chaincodes.
    #[serde(default = "default_shim_level")]
    pub shim_level: String,

    /// Log line format handed to chaincodes.
    #[serde(default)]
    pub format: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shim_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_dir: None,
            chaincode_level: default_log_level(),
            shim_level: default_shim_level(),
            format: None,
        }
    }
}

// ============================================================================
// Support Options
// ============================================================================

/// Options for [`ChaincodeSupport`](crate::ChaincodeSupport).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SupportConfig {
    /// How long a chaincode may take to register after its container is started.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// How long a single INIT or TRANSACTION waits for its response.
    #[serde(default = "default_execute_timeout_ms")]
    pub execute_timeout_ms: u64,

    /// Interval between KEEPALIVE messages. Zero disables keepalive.
    #[serde(default)]
    pub keepalive_ms: u64,

    /// Development mode: chaincodes are started by the user, so registrations
    /// with no launch in flight are accepted.
    #[serde(default)]
    pub user_runs_cc: bool,

    #[serde(default)]
    pub init_policy: InitPolicy,

    /// Address chaincode processes dial to reach the peer.
    #[serde(default = "default_peer_address")]
    pub peer_address: String,

    /// Directory where code packages are unpacked for process chaincodes.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_startup_timeout_ms() -> u64 {
    timeouts::STARTUP_SECS * 1000
}

fn default_execute_timeout_ms() -> u64 {
    timeouts::EXECUTE_SECS * 1000
}

fn default_peer_address() -> String {
    "127.0.0.1:7052".to_string()
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("ccsupport")
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: default_startup_timeout_ms(),
            execute_timeout_ms: default_execute_timeout_ms(),
            keepalive_ms: 0,
            user_runs_cc: false,
            init_policy: InitPolicy::default(),
            peer_address: default_peer_address(),
            work_dir: default_work_dir(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SupportConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_millis(self.execute_timeout_ms)
    }

    /// Keepalive interval, `None` when disabled.
    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_ms > 0).then(|| Duration::from_millis(self.keepalive_ms))
    }

    /// Reject settings that would make every launch or execute fail.
    pub fn validate(&self) -> ChaincodeResult<()> {
        if self.startup_timeout_ms == 0 {
            return Err(ChaincodeError::Config(
                "startup_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.execute_timeout_ms == 0 {
            return Err(ChaincodeError::Config(
                "execute_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.keepalive_ms > timeouts::MAX_KEEPALIVE_SECS * 1000 {
            return Err(ChaincodeError::Config(format!(
                "keepalive_ms must be at most {}",
                timeouts::MAX_KEEPALIVE_SECS * 1000
            )));
        }
        if self.peer_address.is_empty() {
            return Err(ChaincodeError::Config("peer_address must not be empty".into()));
        }
        Ok(())
    }

    /// Environment handed to every chaincode process.
    pub fn chaincode_env(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            (env::PEER_ADDRESS.to_string(), self.peer_address.clone()),
            (
                env::LOGGING_LEVEL.to_string(),
                self.logging.chaincode_level.clone(),
            ),
            (env::LOGGING_SHIM.to_string(), self.logging.shim_level.clone()),
        ];
        if let Some(format) = &self.logging.format {
            vars.push((env::LOGGING_FORMAT.to_string(), format.clone()));
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_peer_defaults() {
        let config = SupportConfig::default();
        assert_eq!(config.startup_timeout(), Duration::from_secs(300));
        assert_eq!(config.execute_timeout(), Duration::from_secs(30));
        assert_eq!(config.keepalive(), None);
        assert_eq!(config.init_policy, InitPolicy::Unchecked);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: SupportConfig =
            serde_json::from_str(r#"{"execute_timeout_ms": 50, "init_policy": "exactly_once"}"#)
                .unwrap();
        assert_eq!(config.execute_timeout(), Duration::from_millis(50));
        assert_eq!(config.startup_timeout(), Duration::from_secs(300));
        assert_eq!(config.init_policy, InitPolicy::ExactlyOnce);
        assert_eq!(config.logging.shim_level, "warn");
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let config = SupportConfig {
            execute_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ChaincodeError::Config(_))));
    }

    #[test]
    fn keepalive_interval_is_bounded() {
        let day = SupportConfig {
            keepalive_ms: 24 * 60 * 60 * 1000,
            ..Default::default()
        };
        assert!(day.validate().is_ok());

        let forever = SupportConfig {
            keepalive_ms: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(forever.validate(), Err(ChaincodeError::Config(_))));
    }

    #[test]
    fn chaincode_env_forwards_logging() {
        let mut config = SupportConfig::default();
        config.logging.format = Some("%{message}".into());
        let vars = config.chaincode_env();
        assert!(vars.contains(&(env::LOGGING_SHIM.to_string(), "warn".to_string())));
        assert!(vars.contains(&(env::LOGGING_FORMAT.to_string(), "%{message}".to_string())));
    }
}
