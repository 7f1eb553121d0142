//! Balancer Configuration
//!
//! ## BalancerConfig
//!
//! - **backends**: static list of upstream addresses (`host:port`), known
//!   at startup; the pool membership never changes at runtime
//! - **timeout_sec**: bound applied to every forwarded request and to each
//!   health probe (default: 3s)
//! - **https**: scheme used for outbound forwards and probes
//! - **trace**: stamp the serving backend into the `lb-from` response header
//! - **probe_interval_sec**: health probe cadence (default: 10s)
//! - **policy**: selection policy; injected at construction, no live
//!   switching

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pool::SelectionPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Upstream addresses (`host:port`)
    pub backends: Vec<String>,

    /// Forward and probe timeout in seconds (default: 3)
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,

    /// Whether backends are reached over HTTPS
    #[serde(default)]
    pub https: bool,

    /// Whether to stamp `lb-from` into responses
    #[serde(default)]
    pub trace: bool,

    /// Health probe cadence in seconds (default: 10)
    #[serde(default = "default_probe_interval_sec")]
    pub probe_interval_sec: u64,

    /// Backend selection policy (default: consistent hash by path)
    #[serde(default)]
    pub policy: SelectionPolicy,
}

impl BalancerConfig {
    /// Configuration with defaults for the given backend list.
    pub fn new(backends: Vec<String>) -> Self {
        Self {
            backends,
            timeout_sec: default_timeout_sec(),
            https: false,
            trace: false,
            probe_interval_sec: default_probe_interval_sec(),
            policy: SelectionPolicy::default(),
        }
    }

    /// Outbound scheme for forwards and probes.
    pub fn scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_sec)
    }
}

fn default_timeout_sec() -> u64 {
    3
}

fn default_probe_interval_sec() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme() {
        let mut config = BalancerConfig::new(vec!["server1:8080".to_string()]);
        assert_eq!(config.scheme(), "http");

        config.https = true;
        assert_eq!(config.scheme(), "https");
    }

    #[test]
    fn test_defaults() {
        let config = BalancerConfig::new(vec![]);
        assert_eq!(config.timeout_sec, 3);
        assert_eq!(config.probe_interval_sec, 10);
        assert!(!config.trace);
        assert_eq!(config.policy, SelectionPolicy::ConsistentHash);
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: BalancerConfig =
            serde_json::from_str(r#"{"backends": ["a:1", "b:2"]}"#).unwrap();
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.forward_timeout(), Duration::from_secs(3));
        assert_eq!(config.probe_interval(), Duration::from_secs(10));
    }
}
