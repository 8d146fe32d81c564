//! Process configuration for the reverse proxy.
//!
//! Mirrors the YAML schema of the original router almost field-for-field
//! (see `port`, `redis_server`, `reload_uri_interval`, ...): operators
//! migrating an existing config file should not have to change it. Layout:
//! [`Config`] holds the raw YAML-shaped fields plus the handful of derived
//! ones ([`Config::ip`], and the `Duration` versions of the `*_in_seconds`
//! fields) that only exist after [`Config::process`] runs.

mod error;
mod local_ip;

pub use error::ConfigError;

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub port: u16,
    pub user: String,
    pub pass: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            port: 8082,
            user: String::new(),
            pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub file: String,
    pub syslog: String,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: String::new(),
            syslog: String::new(),
            level: "debug".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub status: StatusConfig,
    pub logging: LoggingConfig,

    pub port: u16,
    pub index: u32,
    pub go_max_procs: i32,
    pub trace_key: String,
    pub redis_server: String,
    pub access_log: String,

    pub reload_uri_interval: u64,
    pub endpoint_timeout: u64,
    pub drain_timeout: u64,

    /// Populated by [`Config::process`]; empty until then.
    #[serde(skip)]
    pub ip: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status: StatusConfig::default(),
            logging: LoggingConfig::default(),
            port: 8081,
            index: 0,
            go_max_procs: 8,
            trace_key: String::new(),
            redis_server: "127.0.0.1:6379".to_string(),
            access_log: String::new(),
            reload_uri_interval: 5,
            endpoint_timeout: 60,
            drain_timeout: 0,
            ip: String::new(),
        }
    }
}

impl Config {
    /// The compiled-in defaults, already processed (derived fields filled
    /// in, local IP probed).
    pub fn default_processed() -> Result<Self, ConfigError> {
        let mut c = Self::default();
        c.process()?;
        Ok(c)
    }

    /// Reads and parses a YAML file, applying defaults for anything the
    /// document omits, then processes derived fields.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let mut c: Config = serde_yaml::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        c.process()?;
        Ok(c)
    }

    /// Derives `reload_uri_interval`/`endpoint_timeout`/`drain_timeout` as
    /// `Duration`s and resolves `ip` by probing a local non-loopback
    /// interface. Failing to find one is treated as a fatal configuration
    /// error, matching the original's `panic` on the same condition.
    pub fn process(&mut self) -> Result<(), ConfigError> {
        if self.ip.is_empty() {
            self.ip = local_ip::probe_local_ip()?;
        }
        Ok(())
    }

    pub fn reload_uri_interval(&self) -> Duration {
        Duration::from_secs(self.reload_uri_interval)
    }

    pub fn endpoint_timeout(&self) -> Duration {
        Duration::from_secs(self.endpoint_timeout)
    }

    /// Zero means "use the endpoint timeout", matching the original.
    pub fn drain_timeout(&self) -> Duration {
        if self.drain_timeout == 0 {
            self.endpoint_timeout()
        } else {
            Duration::from_secs(self.drain_timeout)
        }
    }
}
