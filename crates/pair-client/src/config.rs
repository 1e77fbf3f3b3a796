//! Pair client configuration.
//!
//! Configuration is loaded from environment variables with defaults that
//! match the behaviour of the browser client this replaces.

use common::config::ObservabilityConfig;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default grace delay before an outbound call under [`CallInitiation::GraceDelay`].
pub const DEFAULT_GRACE_DELAY_MS: u64 = 1000;

/// Default time to wait for a match before giving up.
pub const DEFAULT_SEARCH_TIMEOUT_SECONDS: u64 = 60;

/// Default time to wait for the remote stream once paired.
pub const DEFAULT_CALL_TIMEOUT_SECONDS: u64 = 15;

/// Default number of chat lines the demo binary exchanges.
pub const DEFAULT_DEMO_MESSAGES: u32 = 3;

/// Who places the outbound call once both participants are in a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallInitiation {
    /// The participant with the lexicographically smaller id calls,
    /// the other one only answers.
    #[default]
    LowerIdCalls,
    /// Both sides call after the delay; the last stream to arrive wins.
    GraceDelay(Duration),
}

/// Pair client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Call initiation policy.
    pub call_initiation: CallInitiation,

    /// How long to stay in Searching. `None` waits forever.
    pub search_timeout: Option<Duration>,

    /// How long to wait for a remote stream once InCall. `None` waits forever.
    pub call_timeout: Option<Duration>,

    /// Number of chat lines exchanged by the demo binary.
    pub demo_messages: u32,

    /// Logging setup for the binary.
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            call_initiation: CallInitiation::default(),
            search_timeout: Some(Duration::from_secs(DEFAULT_SEARCH_TIMEOUT_SECONDS)),
            call_timeout: Some(Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECONDS)),
            demo_messages: DEFAULT_DEMO_MESSAGES,
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let grace_delay_ms = parse_or(vars, "PAIR_GRACE_DELAY_MS", DEFAULT_GRACE_DELAY_MS)?;

        let call_initiation = match vars.get("PAIR_CALL_INITIATION").map(String::as_str) {
            None | Some("lower-id") => CallInitiation::LowerIdCalls,
            Some("grace-delay") => {
                CallInitiation::GraceDelay(Duration::from_millis(grace_delay_ms))
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "PAIR_CALL_INITIATION must be 'lower-id' or 'grace-delay', got '{other}'"
                )))
            }
        };

        // 0 disables the timer
        let search_timeout = optional_secs(parse_or(
            vars,
            "PAIR_SEARCH_TIMEOUT_SECONDS",
            DEFAULT_SEARCH_TIMEOUT_SECONDS,
        )?);
        let call_timeout = optional_secs(parse_or(
            vars,
            "PAIR_CALL_TIMEOUT_SECONDS",
            DEFAULT_CALL_TIMEOUT_SECONDS,
        )?);

        let demo_messages = parse_or(vars, "PAIR_DEMO_MESSAGES", DEFAULT_DEMO_MESSAGES)?;

        let json_logs = parse_or(vars, "PAIR_LOG_JSON", false)?;
        let log_level = vars
            .get("PAIR_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| "info".to_string());

        Ok(Config {
            call_initiation,
            search_timeout,
            call_timeout,
            demo_messages,
            observability: ObservabilityConfig {
                log_level,
                json_logs,
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}='{raw}'"))),
    }
}

fn optional_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
