//! Discovers, downloads, verifies, and installs the Tor binary.

mod archive;
mod discover;
mod install;

use std::time::Duration;

pub use discover::DiscoveredRelease;

use crate::error::ProvisionError;
use crate::paths::Paths;

/// Owns the HTTP client and path layout used to keep a managed `tor` binary
/// present and up to date.
pub struct BinaryProvisioner {
    paths: Paths,
    client: reqwest::Client,
}

impl BinaryProvisioner {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            client: reqwest::Client::new(),
        }
    }

    /// True iff a usable `tor` executable can already be found (override, managed
    /// directory, or `PATH`).
    pub fn binaries_present(&self) -> bool {
        install::binaries_present(&self.paths)
    }

    pub fn resolved_binary_path(&self) -> Option<std::path::PathBuf> {
        install::find_tor_binary(&self.paths)
    }

    /// Ensure a `tor` binary is available, installing the latest Expert Bundle if
    /// necessary. Returns a version string (`"external"` when `TOR_BINARY_OVERRIDE`
    /// or a `PATH` binary was used instead of a managed install).
    pub async fn ensure_binaries(&self, download_timeout: Duration) -> Result<String, ProvisionError> {
        if std::env::var(crate::config::TOR_BINARY_OVERRIDE_ENV).is_ok() {
            if install::find_tor_binary(&self.paths).is_some() {
                return Ok("external".to_string());
            }
        }
        if self.paths.tor_binary_path().is_file() {
            return Ok("already-installed".to_string());
        }
        if let Some(path) = install::find_tor_binary(&self.paths) {
            if path != self.paths.tor_binary_path() {
                return Ok("external".to_string());
            }
        }
        install::install_latest(&self.paths, &self.client, download_timeout).await
    }
}
