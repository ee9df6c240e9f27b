// ABOUTME: Environment-driven server configuration
// ABOUTME: Invalid values are startup errors, not silent fallbacks

use std::env;
use std::num::ParseIntError;
use std::time::Duration;

use thiserror::Error;

use capsule_sandbox::REAP_PERIOD;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("Invalid duration for {0}: {1}")]
    InvalidDuration(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Restrict CORS to this origin; None allows any origin (development).
    pub cors_origin: Option<String>,
    pub reaper_interval: Duration,
    pub image_pull_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "8080".to_string());
        let port = port_str.parse::<u16>()?;
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let cors_origin = env::var("CORS_ORIGIN").ok().filter(|s| !s.is_empty());

        let reaper_interval = duration_secs_var("REAPER_INTERVAL_SECS", REAP_PERIOD.as_secs())?;
        let image_pull_timeout = duration_secs_var("IMAGE_PULL_TIMEOUT_SECS", 600)?;

        Ok(Config {
            port,
            cors_origin,
            reaper_interval,
            image_pull_timeout,
        })
    }
}

fn duration_secs_var(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(raw) => {
            let secs = raw
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidDuration(name, raw))?;
            if secs == 0 {
                return Err(ConfigError::InvalidDuration(name, "0".to_string()));
            }
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default_secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // Environment mutation is process-wide; keep this test scoped to
        // variables no other test sets.
        let config = Config::from_env().expect("default config");
        assert_eq!(config.reaper_interval, Duration::from_secs(30));
        assert_eq!(config.image_pull_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_duration_parsing() {
        assert_eq!(
            duration_secs_var("CAPSULE_TEST_UNSET_DURATION", 45).expect("default"),
            Duration::from_secs(45)
        );
    }
}
