//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

/// The floor for the scrape interval. Polling JMX beans is not free for the
/// monitored Cassandra process, so anything faster is clamped.
pub const MINIMUM_SCRAPE_INTERVAL: Duration = Duration::from_secs(10);

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error for IO operations when reading a config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

fn default_endpoint() -> String {
    "http://localhost:8778".to_string()
}

fn default_interval_seconds() -> u64 {
    30
}

fn default_binding_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_timeout_seconds() -> u64 {
    3
}

fn default_concurrency() -> usize {
    10
}

/// Main casstat configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Base URL of the Jolokia agent running alongside Cassandra.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Seconds between scrape cycles, clamped to
    /// [`MINIMUM_SCRAPE_INTERVAL`].
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Address the HTTP server binds to.
    #[serde(default = "default_binding_addr")]
    pub binding_addr: SocketAddr,
    /// Seconds before an individual request to the agent times out.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// How many per-table fetches run at once within a cycle.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            interval_seconds: default_interval_seconds(),
            binding_addr: default_binding_addr(),
            timeout_seconds: default_timeout_seconds(),
            concurrency: default_concurrency(),
        }
    }
}

impl Config {
    /// Read a [`Config`] from a YAML file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not deserialize.
    pub fn from_path(path: &str) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// The effective scrape interval, never below
    /// [`MINIMUM_SCRAPE_INTERVAL`].
    #[must_use]
    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds).max(MINIMUM_SCRAPE_INTERVAL)
    }

    /// The per-request timeout for talks with the agent.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: Config = serde_yaml::from_str("{}").expect("document must deserialize");
        assert_eq!(config, Config::default());
        assert_eq!(config.endpoint, "http://localhost:8778");
        assert_eq!(config.binding_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(config.scrape_interval(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Duration::from_secs(3));
        assert_eq!(config.concurrency, 10);
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let contents = r"
endpoint: http://cassandra-0:8778
interval_seconds: 60
binding_addr: 127.0.0.1:9500
timeout_seconds: 5
concurrency: 4
";
        let config: Config = serde_yaml::from_str(contents).expect("document must deserialize");
        assert_eq!(config.endpoint, "http://cassandra-0:8778");
        assert_eq!(config.scrape_interval(), Duration::from_secs(60));
        assert_eq!(config.binding_addr, SocketAddr::from(([127, 0, 0, 1], 9500)));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn intervals_below_the_floor_are_clamped() {
        let config: Config =
            serde_yaml::from_str("interval_seconds: 2").expect("document must deserialize");
        assert_eq!(config.scrape_interval(), MINIMUM_SCRAPE_INTERVAL);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<Config, _> = serde_yaml::from_str("intervall_seconds: 30");
        assert!(result.is_err());
    }
}
