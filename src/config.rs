//! Supervisor-wide configuration: capacity limits and timeouts.
//!
//! Mirrors the shape of the teacher crate's `PrivacyConfig`: a `serde`-derived
//! struct with documented defaults and an `with_env_overrides()` escape hatch for
//! embedders that configure the supervisor from the process environment.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_max_socks_ports() -> usize {
    10
}

fn default_max_control_ports() -> usize {
    10
}

fn default_max_hidden_services() -> usize {
    20
}

fn default_max_port_resolve_attempts() -> u32 {
    20
}

fn default_download_timeout_secs() -> u64 {
    120
}

fn default_bootstrap_timeout_secs() -> u64 {
    30
}

fn default_stop_drain_timeout_secs() -> u64 {
    10
}

fn default_control_read_timeout_secs() -> u64 {
    5
}

/// Tunable limits and timeouts for a [`crate::facade::TorManager`] instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Maximum number of `SocksPort` directives in one configuration (default: 10).
    #[serde(default = "default_max_socks_ports")]
    pub max_socks_ports: usize,

    /// Maximum number of `ControlPort` directives in one configuration (default: 10).
    #[serde(default = "default_max_control_ports")]
    pub max_control_ports: usize,

    /// Maximum number of persistent hidden services (default: 20). Enforced strictly.
    #[serde(default = "default_max_hidden_services")]
    pub max_hidden_services: usize,

    /// Maximum number of forward-scan attempts the port allocator makes before
    /// giving up (default: 20).
    #[serde(default = "default_max_port_resolve_attempts")]
    pub max_port_resolve_attempts: u32,

    /// Timeout for downloading the Tor Expert Bundle archive (default: 120s).
    #[serde(
        default = "default_download_timeout_secs",
        rename = "download_timeout_secs"
    )]
    download_timeout_secs: u64,

    /// Timeout waiting for `Bootstrapped 100%` on `start()` (default: 30s).
    #[serde(
        default = "default_bootstrap_timeout_secs",
        rename = "bootstrap_timeout_secs"
    )]
    bootstrap_timeout_secs: u64,

    /// Timeout waiting for a graceful shutdown to drain before escalating to a
    /// hard kill (default: 10s).
    #[serde(
        default = "default_stop_drain_timeout_secs",
        rename = "stop_drain_timeout_secs"
    )]
    stop_drain_timeout_secs: u64,

    /// Per-line read timeout on the control port (default: 5s).
    #[serde(
        default = "default_control_read_timeout_secs",
        rename = "control_read_timeout_secs"
    )]
    control_read_timeout_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_socks_ports: default_max_socks_ports(),
            max_control_ports: default_max_control_ports(),
            max_hidden_services: default_max_hidden_services(),
            max_port_resolve_attempts: default_max_port_resolve_attempts(),
            download_timeout_secs: default_download_timeout_secs(),
            bootstrap_timeout_secs: default_bootstrap_timeout_secs(),
            stop_drain_timeout_secs: default_stop_drain_timeout_secs(),
            control_read_timeout_secs: default_control_read_timeout_secs(),
        }
    }
}

impl SupervisorConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    pub fn stop_drain_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_drain_timeout_secs)
    }

    pub fn control_read_timeout(&self) -> Duration {
        Duration::from_secs(self.control_read_timeout_secs)
    }

    /// Check if this is the default configuration.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Apply environment variable overrides (`TORMAN_*`).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("TORMAN_MAX_HIDDEN_SERVICES") {
            if let Ok(n) = v.parse() {
                self.max_hidden_services = n;
            }
        }
        if let Ok(v) = env::var("TORMAN_MAX_PORT_RESOLVE_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                self.max_port_resolve_attempts = n;
            }
        }
        if let Ok(v) = env::var("TORMAN_BOOTSTRAP_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.bootstrap_timeout_secs = n;
            }
        }
        self
    }
}

/// Path to a pre-installed Tor binary, bypassing the binary provisioner.
///
/// When set, [`crate::provision::BinaryProvisioner::ensure_binaries`] records the
/// version as `"external"` rather than querying the Tor Project download index.
pub const TOR_BINARY_OVERRIDE_ENV: &str = "TOR_BINARY_OVERRIDE";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.max_socks_ports, 10);
        assert_eq!(config.max_control_ports, 10);
        assert_eq!(config.max_hidden_services, 20);
        assert_eq!(config.max_port_resolve_attempts, 20);
        assert_eq!(config.bootstrap_timeout(), Duration::from_secs(30));
        assert_eq!(config.stop_drain_timeout(), Duration::from_secs(10));
        assert!(config.is_default());
    }

    #[test]
    fn env_override_changes_only_named_field() {
        env::set_var("TORMAN_MAX_HIDDEN_SERVICES", "5");
        let config = SupervisorConfig::default().with_env_overrides();
        env::remove_var("TORMAN_MAX_HIDDEN_SERVICES");
        assert_eq!(config.max_hidden_services, 5);
        assert_eq!(config.max_socks_ports, 10);
    }
}
