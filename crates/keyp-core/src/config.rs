//! Configuration loading
//!
//! Recognized source order: the `KEYP_SESSION_TIMEOUT` environment variable
//! overrides `~/.keyp/config.yaml`, which overrides the built-in default of
//! 15 minutes. The config file is a single-level key/value format; the only
//! recognized key is `session_timeout` with a duration literal such as
//! `900s`, `15m`, or `2h`. Invalid values fail at load time rather than
//! being silently replaced.

use std::path::Path;
use std::time::Duration;

use crate::error::{VaultError, VaultResult};

/// Environment variable overriding the configured session timeout
pub const ENV_SESSION_TIMEOUT: &str = "KEYP_SESSION_TIMEOUT";

/// keyp configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub session_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_timeout: crate::session::DEFAULT_SESSION_TIMEOUT,
        }
    }
}

impl Config {
    /// Load configuration from the environment and `~/.keyp/config.yaml`.
    pub fn load() -> VaultResult<Self> {
        if let Ok(value) = std::env::var(ENV_SESSION_TIMEOUT) {
            let timeout = parse_duration(&value).map_err(|err| {
                VaultError::BadRequest(format!("invalid {ENV_SESSION_TIMEOUT}: {err}"))
            })?;
            return Ok(Self {
                session_timeout: timeout,
            });
        }

        let Some(home) = dirs::home_dir() else {
            return Ok(Self::default());
        };
        Self::load_file(&home.join(".keyp").join("config.yaml"))
    }

    /// Load configuration from a specific file; a missing file yields the
    /// defaults.
    pub fn load_file(path: &Path) -> VaultResult<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default())
            }
            Err(err) => return Err(err.into()),
        };

        let mut config = Self::default();
        for line in data.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("session_timeout:") {
                config.session_timeout = parse_duration(rest.trim()).map_err(|err| {
                    VaultError::BadRequest(format!("invalid session_timeout in config: {err}"))
                })?;
                break;
            }
        }

        Ok(config)
    }
}

/// Parse a duration literal: an integer followed by `s`, `m`, or `h`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit) = s.split_at(s.len().saturating_sub(1));
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("'{s}' is not a duration (expected forms like 900s, 15m, 2h)"))?;

    match unit {
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(format!(
            "'{s}' has an unknown duration unit (expected s, m, or h)"
        )),
    }
}
