//! Configuration module for the gateway.
//!
//! Defaults live on [`General`]; a TOML file may override them and the
//! command line overrides both (see `app::args`). The resulting [`Config`]
//! is stored globally behind an `ArcSwap` and read with [`get_config`].

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde_derive::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::errors::ShimError;

mod general;

#[cfg(test)]
mod tests;

pub use general::General;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hard cap on the session pool size.
pub const MAX_SESSIONS_LIMIT: usize = 100;

/// Smallest permitted reaper timeout, seconds.
pub const MIN_SESSION_TIMEOUT: u64 = 60;

/// Globally available configuration.
static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Configuration wrapper.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub general: General,
}

impl Config {
    /// Validate the configuration.
    pub fn validate(&mut self) -> Result<(), ShimError> {
        if self.general.max_sessions == 0 {
            return Err(ShimError::BadConfig(
                "max_sessions must be at least 1".to_string(),
            ));
        }
        if self.general.max_sessions > MAX_SESSIONS_LIMIT {
            return Err(ShimError::BadConfig(format!(
                "max_sessions is capped at {MAX_SESSIONS_LIMIT}"
            )));
        }
        if self.general.session_timeout < MIN_SESSION_TIMEOUT {
            return Err(ShimError::BadConfig(format!(
                "session_timeout must be at least {MIN_SESSION_TIMEOUT} seconds"
            )));
        }
        if self.general.worker_threads == 0 {
            return Err(ShimError::BadConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        parse_ports(&self.general.ports)?;
        Ok(())
    }
}

/// A single listening port from the `ports` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenPort {
    pub port: u16,
    pub tls: bool,
}

/// Parse the comma-separated ports option; a trailing `s` marks TLS.
pub fn parse_ports(ports: &str) -> Result<Vec<ListenPort>, ShimError> {
    let mut parsed = Vec::new();
    for entry in ports.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (digits, tls) = match entry.strip_suffix(['s', 'S']) {
            Some(digits) => (digits, true),
            None => (entry, false),
        };
        let port = digits.parse::<u16>().map_err(|_| {
            ShimError::BadConfig(format!("invalid port specification: {entry:?}"))
        })?;
        parsed.push(ListenPort { port, tls });
    }
    if parsed.is_empty() {
        return Err(ShimError::BadConfig("no listening ports given".to_string()));
    }
    Ok(parsed)
}

/// Get a read-only instance of the configuration
/// from anywhere in the app.
/// ArcSwap makes this cheap and quick.
pub fn get_config() -> Config {
    (*(*CONFIG.load())).clone()
}

/// Replace the global configuration.
pub fn set_config(config: Config) {
    CONFIG.store(config.into());
}

/// Parse the TOML configuration file located at the path and install it
/// globally.
pub async fn parse(path: &str) -> Result<(), ShimError> {
    let mut contents = String::new();
    let mut file = File::open(path)
        .await
        .map_err(|err| ShimError::BadConfig(format!("Could not open '{path}': {err}")))?;
    file.read_to_string(&mut contents)
        .await
        .map_err(|err| ShimError::BadConfig(format!("Could not read config file: {err}")))?;

    let mut config: Config = toml::from_str(&contents)
        .map_err(|err| ShimError::BadConfig(format!("TOML parse error: {err}")))?;
    config.validate()?;
    set_config(config);
    Ok(())
}
