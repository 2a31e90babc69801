//! Engine configuration: node endpoint, session identity, and tuning knobs.

use std::env;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Default FCP host when neither configuration nor environment supplies one.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default FCP port.
pub const DEFAULT_PORT: u16 = 9481;

/// Environment variable overriding the default host.
pub const HOST_ENV_VAR: &str = "FCP_HOST";

/// Environment variable overriding the default port.
pub const PORT_ENV_VAR: &str = "FCP_PORT";

/// Default poll budget for each side of the coordinator loop.
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Default TCP connect timeout.
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Address of the daemon's FCP port.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct NodeEndpoint {
    /// Hostname or address of the daemon.
    pub host: String,
    /// FCP port number.
    pub port: u16,
}

impl NodeEndpoint {
    /// Builds an endpoint from explicit parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolves the endpoint from `FCP_HOST`/`FCP_PORT`, falling back to the
    /// loopback defaults. A malformed `FCP_PORT` falls back rather than
    /// failing; an explicit endpoint should be used when strictness matters.
    pub fn from_env() -> Self {
        let host = env::var(HOST_ENV_VAR)
            .map(|value| value.trim().to_owned())
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_owned());
        let port = env::var(PORT_ENV_VAR)
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Self { host, port }
    }
}

impl Default for NodeEndpoint {
    fn default() -> Self {
        Self::from_env()
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Errors encountered while parsing a [`NodeEndpoint`] from `host:port` text.
#[derive(Debug, Error)]
pub enum EndpointParseError {
    /// The value carried no `:` separator.
    #[error("endpoint {value:?} is not of the form host:port")]
    MissingPort { value: String },
    /// The port component was not a valid number.
    #[error("invalid port in endpoint {value:?}: {source}")]
    InvalidPort {
        value: String,
        #[source]
        source: ParseIntError,
    },
}

impl FromStr for NodeEndpoint {
    type Err = EndpointParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (host, port) = value
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError::MissingPort {
                value: value.to_owned(),
            })?;
        let port = port.parse().map_err(|source| EndpointParseError::InvalidPort {
            value: value.to_owned(),
            source,
        })?;
        Ok(Self::new(host, port))
    }
}

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Human-readable single line output.
    #[default]
    Compact,
    /// Structured JSON suitable for ingestion by logging stacks.
    Json,
}

/// Engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Where the daemon's FCP port lives.
    pub endpoint: NodeEndpoint,
    /// Client session name presented in the handshake. Persistent requests
    /// are scoped to this name across sessions, so callers planning to
    /// reclaim them must pin it rather than accept the generated default.
    pub session_name: Option<String>,
    /// Poll budget per coordinator loop iteration, in milliseconds.
    pub poll_interval_ms: u64,
    /// TCP connect timeout, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Tracing filter expression for [`crate::telemetry::init`].
    pub log_filter: String,
    /// Output format for [`crate::telemetry::init`].
    pub log_format: LogFormat,
}

impl Config {
    /// The per-iteration poll budget as a duration.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The transport connect timeout as a duration.
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: NodeEndpoint::default(),
            session_name: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            log_filter: String::from("info"),
            log_format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case("127.0.0.1:9481", "127.0.0.1", 9481)]
    #[case("node.local:19841", "node.local", 19841)]
    fn parses_endpoint_strings(#[case] raw: &str, #[case] host: &str, #[case] port: u16) {
        let endpoint: NodeEndpoint = raw.parse().expect("parse endpoint");
        assert_eq!(endpoint, NodeEndpoint::new(host, port));
        assert_eq!(endpoint.to_string(), raw);
    }

    #[rstest]
    #[case("no-port-here")]
    #[case("host:not-a-number")]
    fn rejects_malformed_endpoint_strings(#[case] raw: &str) {
        assert!(raw.parse::<NodeEndpoint>().is_err());
    }

    #[test]
    fn default_config_uses_loopback_and_documented_tunables() {
        // The env override path is exercised manually; tests stay off
        // process-global state.
        let config = Config {
            endpoint: NodeEndpoint::new(DEFAULT_HOST, DEFAULT_PORT),
            ..Config::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.connect_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.log_format, LogFormat::Compact);
    }
}
