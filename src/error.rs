//! Error taxonomy for the Tor process manager.
//!
//! Each component gets its own error enum; [`TorManagerError`] is what the facade
//! in [`crate::facade`] actually returns, with `#[from]` conversions from every
//! component error so `?` works across module boundaries.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while discovering, downloading, verifying, or unpacking a Tor
/// distribution.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("network error while reaching the Tor download origin: {0}")]
    NetworkUnreachable(#[from] reqwest::Error),

    #[error("no Tor Expert Bundle is published for this OS/architecture combination")]
    ArchitectureUnsupported,

    #[error("downloaded archive is corrupt or could not be unpacked: {0}")]
    ArchiveCorrupt(String),

    #[error("downloaded archive failed integrity verification against the published checksum")]
    IntegrityMismatch,

    #[error("permission denied writing to {0}")]
    PermissionDenied(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised mutating or rendering the torrc model.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("port {0} is already in use by another listener in this configuration")]
    DuplicatePort(u16),

    #[error("a hidden service already occupies virtual port {virtual_port} with target {target_port}")]
    DuplicateHiddenService { virtual_port: u16, target_port: u16 },

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("malformed torrc: {0}")]
    MalformedTorrc(String),

    #[error("port allocator exhausted {attempts} attempts starting from {requested}")]
    PortResolveExhausted { requested: u16, attempts: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised supervising the Tor child process.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("a Tor process is already running under this supervisor")]
    AlreadyRunning,

    #[error("Tor did not reach 100% bootstrap within the configured timeout")]
    StartTimeout,

    #[error("the managed Tor binary is missing; call ensure_binaries() first")]
    BinaryMissing,

    #[error("failed to spawn the Tor process: {0}")]
    SpawnFailed(std::io::Error),

    #[error("the Tor process exited unexpectedly (status: {0:?})")]
    UnexpectedExit(Option<i32>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised talking to Tor's control port.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("connection to the control port was refused: {0}")]
    ConnectionRefused(std::io::Error),

    #[error("control port authentication failed: {0}")]
    AuthFailed(String),

    #[error("control protocol error: {0}")]
    ProtocolError(String),

    #[error("Tor rejected the command with status {code}: {text}")]
    CommandRejected { code: u16, text: String },

    #[error("timed out waiting for a control port reply")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised touching the on-disk data directory / hidden-service key material.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("expected path is missing: {0}")]
    PathMissing(PathBuf),

    #[error("permission denied writing to {0}")]
    WritePermissionDenied(PathBuf),

    #[error("hidden service key material at {0} is corrupt or unreadable")]
    KeyMaterialCorrupt(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The single error type the facade returns to callers.
#[derive(Error, Debug)]
pub enum TorManagerError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("precondition failed: {0}")]
    Precondition(String),
}

pub type Result<T, E = TorManagerError> = std::result::Result<T, E>;
