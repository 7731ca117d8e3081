//! In-memory representation of a torrc configuration.

use std::path::PathBuf;

/// Authentication mode advertised in torrc for the control port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// `CookieAuthentication 1`
    Cookie,
    /// `HashedControlPassword <hash>`
    HashedPassword(String),
}

/// An ordered, distinct sequence of ports, bounded by a role-specific capacity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerSet {
    ports: Vec<u16>,
}

impl ListenerSet {
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn contains(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Append `port` if it isn't already present. Returns `false` if it was a
    /// duplicate (caller decides whether that's an error).
    pub fn push(&mut self, port: u16) -> bool {
        if self.ports.contains(&port) {
            return false;
        }
        self.ports.push(port);
        true
    }
}

/// A persistent hidden service: key material lives on disk under `directory`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenService {
    pub directory: PathBuf,
    pub virtual_port: u16,
    pub target_port: u16,
    /// True if the caller supplied key material before the first start.
    pub preconfig: bool,
    /// The `.onion` hostname, populated once Tor materializes the service.
    pub host: Option<String>,
    pub public_key: Option<Vec<u8>>,
    pub secret_key: Option<Vec<u8>>,
}

impl HiddenService {
    pub fn new(directory: PathBuf, virtual_port: u16, target_port: u16) -> Self {
        Self {
            directory,
            virtual_port,
            target_port,
            preconfig: false,
            host: None,
            public_key: None,
            secret_key: None,
        }
    }
}

/// A runtime (ephemeral or detached) hidden service created via `ADD_ONION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeHiddenService {
    pub onion_address: String,
    pub virtual_port: u16,
    pub target_port: u16,
    /// Opaque `"ED25519-V3:<base64>"` blob as returned by Tor; decoded only when
    /// persisting to disk.
    pub service_key: String,
    /// If true, the service is destroyed with the Tor process (`ADD_ONION` without
    /// `Flags=Detach`).
    pub temporary: bool,
}

/// The canonical in-memory torrc: SOCKS/control listeners, hidden services, and the
/// handful of scalar directives this crate manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrcModel {
    pub data_directory: PathBuf,
    pub log_level: String,
    pub auth_mode: AuthMode,
    pub socks_ports: ListenerSet,
    pub control_ports: ListenerSet,
    pub hidden_services: Vec<HiddenService>,
}

impl TorrcModel {
    pub fn new(data_directory: PathBuf) -> Self {
        Self {
            data_directory,
            log_level: "notice stdout".to_string(),
            auth_mode: AuthMode::Cookie,
            socks_ports: ListenerSet::default(),
            control_ports: ListenerSet::default(),
            hidden_services: Vec::new(),
        }
    }

    pub fn all_claimed_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.socks_ports
            .ports()
            .iter()
            .chain(self.control_ports.ports())
            .copied()
    }

    pub fn hidden_service_virtual_target_collision(
        &self,
        virtual_port: u16,
        target_port: u16,
    ) -> bool {
        self.hidden_services
            .iter()
            .any(|hs| hs.virtual_port == virtual_port && hs.target_port == target_port)
    }
}
