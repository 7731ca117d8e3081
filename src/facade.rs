//! Public orchestrator: composes every component in the order the concurrency
//! model requires.
//!
//! Method surface is grounded in the original Python `dtor.TorHandler`, which
//! exercises exactly this set end to end: discovering and installing binaries,
//! registering SOCKS/control/hidden-service listeners, saving torrc, starting the
//! daemon, then runtime `ADD_ONION`/`SETCONF` mutations and process control.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use crate::config::SupervisorConfig;
use crate::control::{commands, ControlSession, Reply};
use crate::error::{ConfigError, ProcessError, TorManagerError};
use crate::hidden_service;
use crate::paths::Paths;
use crate::ports::{PortAllocator, PortRole};
use crate::provision::BinaryProvisioner;
use crate::supervisor::{ProcessHandle, Supervisor};
use crate::torrc::{self, RuntimeHiddenService, TorrcModel};

/// Advisory lock for one data root. Removed on `Drop`; its absence on a later
/// `new()` is not itself an error, and its presence just produces a `warn!`.
struct LockFile {
    path: PathBuf,
    held: bool,
}

impl LockFile {
    fn acquire(path: PathBuf) -> Self {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Self { path, held: true },
            Err(_) => {
                warn!(
                    path = %path.display(),
                    "lock file already exists; another manager may own this data root"
                );
                Self { path, held: false }
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if self.held {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Everything needed to mutate the torrc model and its attendant allocator, kept
/// behind one mutex so mutations are totally ordered (§5: single owner, multi-reader).
struct ModelState {
    model: TorrcModel,
    allocator: PortAllocator,
}

/// Top-level handle for one supervised Tor daemon.
pub struct TorManager {
    paths: Paths,
    config: SupervisorConfig,
    provisioner: BinaryProvisioner,
    state: Mutex<ModelState>,
    supervisor: Mutex<Supervisor>,
    runtime_services: Mutex<Vec<RuntimeHiddenService>>,
    /// Plaintext control-port password, used only when the daemon advertises
    /// `HASHEDPASSWORD` (§4.3). Never rendered into torrc; the model only ever
    /// stores the one-way `HashedControlPassword` hash.
    control_password: Mutex<Option<String>>,
    _lock: LockFile,
}

impl TorManager {
    /// Construct a manager rooted at `root` (or the platform data directory). If
    /// `recover` is true, an existing torrc is parsed and hidden services are
    /// refreshed from disk so prior onion addresses are immediately known.
    pub async fn new(root: Option<PathBuf>, recover: bool) -> Result<Self, TorManagerError> {
        let paths = Paths::new(root);
        paths.ensure()?;
        let lock = LockFile::acquire(paths.lock_path());

        let config = SupervisorConfig::default().with_env_overrides();

        let mut model = TorrcModel::new(paths.data_dir());
        let mut allocator = PortAllocator::new();

        if recover && paths.torrc_path().is_file() {
            let text = std::fs::read_to_string(paths.torrc_path()).map_err(ConfigError::Io)?;
            model = torrc::parse(&text)?;
            for port in model.socks_ports.ports() {
                allocator.mark_claimed(*port, PortRole::Socks);
            }
            for port in model.control_ports.ports() {
                allocator.mark_claimed(*port, PortRole::Control);
            }
            hidden_service::refresh_all(&mut model, &paths)?;
        }

        let supervisor = Supervisor::new(paths.tor_binary_path());
        let provisioner = BinaryProvisioner::new(paths.clone());

        Ok(Self {
            paths,
            config,
            provisioner,
            state: Mutex::new(ModelState { model, allocator }),
            supervisor: Mutex::new(supervisor),
            runtime_services: Mutex::new(Vec::new()),
            control_password: Mutex::new(None),
            _lock: lock,
        })
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Configure the plaintext password to send on `AUTHENTICATE` when the daemon
    /// advertises `HASHEDPASSWORD` (i.e. torrc sets `HashedControlPassword`).
    /// Without this, a recovered or loaded torrc using hashed-password auth can
    /// never be authenticated against.
    pub async fn set_control_password(&self, password: Option<String>) {
        *self.control_password.lock().await = password;
    }

    /// Ensure a `tor` binary is present, downloading the latest Expert Bundle if
    /// necessary. Repoints the supervisor at whatever path was actually resolved
    /// (the managed install, an external override, or a `PATH` binary) so
    /// `start_service` spawns the right executable.
    pub async fn ensure_binaries(&self) -> Result<String, TorManagerError> {
        let version = self
            .provisioner
            .ensure_binaries(self.config.download_timeout())
            .await?;
        if let Some(resolved) = self.provisioner.resolved_binary_path() {
            self.supervisor.lock().await.set_binary_path(resolved);
        }
        Ok(version)
    }

    pub async fn add_socks_port(&self, requested: u16, collision_resolve: bool) -> Result<u16, TorManagerError> {
        let mut state = self.state.lock().await;
        if state.model.socks_ports.len() >= self.config.max_socks_ports {
            return Err(ConfigError::CapacityExceeded("max_socks_ports reached".to_string()).into());
        }
        let port = state.allocator.reserve(
            requested,
            PortRole::Socks,
            collision_resolve,
            self.config.max_port_resolve_attempts,
        )?;
        state.model.socks_ports.push(port);
        Ok(port)
    }

    pub async fn add_control_port(&self, requested: u16, collision_resolve: bool) -> Result<u16, TorManagerError> {
        let mut state = self.state.lock().await;
        if state.model.control_ports.len() >= self.config.max_control_ports {
            return Err(ConfigError::CapacityExceeded("max_control_ports reached".to_string()).into());
        }
        let port = state.allocator.reserve(
            requested,
            PortRole::Control,
            collision_resolve,
            self.config.max_port_resolve_attempts,
        )?;
        state.model.control_ports.push(port);
        Ok(port)
    }

    pub async fn register_hidden_service(
        &self,
        virtual_port: u16,
        target_port: u16,
        preconfig: bool,
        collision_resolve: bool,
    ) -> Result<usize, TorManagerError> {
        let mut state = self.state.lock().await;
        let ModelState { model, allocator } = &mut *state;
        Ok(hidden_service::register_hidden_service(
            model,
            &self.paths,
            allocator,
            virtual_port,
            target_port,
            preconfig,
            collision_resolve,
            self.config.max_hidden_services,
            self.config.max_port_resolve_attempts,
        )?)
    }

    pub async fn save_torrc(&self) -> Result<(), TorManagerError> {
        let state = self.state.lock().await;
        let text = torrc::render(&state.model);
        std::fs::write(self.paths.torrc_path(), text).map_err(ConfigError::Io)?;
        Ok(())
    }

    pub async fn load_torrc(&self) -> Result<(), TorManagerError> {
        let text = std::fs::read_to_string(self.paths.torrc_path()).map_err(ConfigError::Io)?;
        let model = torrc::parse(&text)?;
        let mut state = self.state.lock().await;
        for port in model.socks_ports.ports() {
            state.allocator.mark_claimed(*port, PortRole::Socks);
        }
        for port in model.control_ports.ports() {
            state.allocator.mark_claimed(*port, PortRole::Control);
        }
        state.model = model;
        Ok(())
    }

    pub async fn refresh_all_hidden_services(&self) -> Result<(), TorManagerError> {
        let mut state = self.state.lock().await;
        hidden_service::refresh_all(&mut state.model, &self.paths)?;
        Ok(())
    }

    /// Probes every claimed port for bind availability; returns the ports that are
    /// no longer free (e.g. taken by another process since they were allocated).
    pub async fn detect_port_conflicts(&self) -> Vec<u16> {
        let state = self.state.lock().await;
        state
            .model
            .all_claimed_ports()
            .filter(|&port| std::net::TcpListener::bind(("127.0.0.1", port)).is_err())
            .collect()
    }

    pub async fn start_service(&self) -> Result<(), TorManagerError> {
        let mut supervisor = self.supervisor.lock().await;
        supervisor
            .start(&self.paths.torrc_path(), self.config.bootstrap_timeout())
            .await?;
        Ok(())
    }

    /// Prefers `SIGNAL SHUTDOWN` over the control port, the same path a `tor`
    /// daemon's own operator would use; only falls back to a raw OS termination
    /// signal when the control port itself can't be reached (§4.6).
    pub async fn stop_service(&self) -> Result<(), TorManagerError> {
        let shutdown_signaled = match self.open_control_session().await {
            Ok(mut session) => match session.send(&[commands::signal("SHUTDOWN")]).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(error = %e, "SIGNAL SHUTDOWN failed after connecting, falling back to OS signal");
                    false
                }
            },
            Err(e) => {
                warn!(error = %e, "control port unreachable, falling back to OS signal");
                false
            }
        };

        let mut supervisor = self.supervisor.lock().await;
        if shutdown_signaled {
            if !supervisor.wait_for_exit(self.config.stop_drain_timeout()).await? {
                supervisor.force_stop().await?;
            }
            Ok(())
        } else {
            supervisor.stop(self.config.stop_drain_timeout()).await?;
            Ok(())
        }
    }

    pub async fn restart_service(&self) -> Result<(), TorManagerError> {
        self.stop_service().await?;
        let mut supervisor = self.supervisor.lock().await;
        supervisor
            .start(&self.paths.torrc_path(), self.config.bootstrap_timeout())
            .await?;
        Ok(())
    }

    pub async fn force_stop_tor(&self) -> Result<(), TorManagerError> {
        let mut supervisor = self.supervisor.lock().await;
        supervisor.force_stop().await?;
        Ok(())
    }

    pub async fn get_tor_process(&self) -> Option<ProcessHandle> {
        let mut supervisor = self.supervisor.lock().await;
        supervisor.is_running();
        supervisor.handle().cloned()
    }

    pub async fn terminate_all_tor_processes(&self) -> usize {
        self.supervisor.lock().await.terminate_all_tor_processes()
    }

    pub async fn terminate_all_tor_processes_unchecked(&self) -> usize {
        self.supervisor
            .lock()
            .await
            .terminate_all_tor_processes_unchecked()
    }

    /// Open a fresh authenticated control session against the first configured
    /// control port.
    async fn open_control_session(&self) -> Result<ControlSession, TorManagerError> {
        let control_port = {
            let state = self.state.lock().await;
            *state
                .model
                .control_ports
                .ports()
                .first()
                .ok_or_else(|| TorManagerError::Precondition("no control port configured".to_string()))?
        };
        let mut session = ControlSession::connect(control_port, self.config.control_read_timeout()).await?;
        let password = self.control_password.lock().await.clone();
        session.authenticate(password.as_deref()).await?;
        Ok(session)
    }

    /// Send raw control-protocol lines in order, returning each reply. Retries the
    /// whole batch once after a short backoff if the control port was just
    /// reconfigured and the connection transiently fails (§5).
    pub async fn send_control_commands(&self, lines: &[String]) -> Result<Vec<(String, Reply)>, TorManagerError> {
        let mut attempts = 0;
        loop {
            match self.open_control_session().await {
                Ok(mut session) => return Ok(session.send(lines).await?),
                Err(e) if attempts < 3 => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(200 * attempts as u64)).await;
                    warn!(attempt = attempts, "retrying control command after reconnect failure");
                    let _ = e;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `SETCONF SocksPort=<existing>,+<new>` at runtime; durable if `temporary` is
    /// false.
    pub async fn add_runtime_socks_port(&self, port: u16, temporary: bool) -> Result<(), TorManagerError> {
        self.add_runtime_listener_port("SocksPort", port, temporary).await
    }

    pub async fn add_runtime_control_port(&self, port: u16, temporary: bool) -> Result<(), TorManagerError> {
        self.add_runtime_listener_port("ControlPort", port, temporary).await
    }

    async fn add_runtime_listener_port(
        &self,
        keyword: &str,
        port: u16,
        temporary: bool,
    ) -> Result<(), TorManagerError> {
        let value = format!("+{port}");
        let cmd = commands::set_conf(&[(keyword, value)]);
        self.send_control_commands(&[cmd]).await?;

        if !temporary {
            let mut state = self.state.lock().await;
            match keyword {
                "SocksPort" => {
                    state.model.socks_ports.push(port);
                }
                "ControlPort" => {
                    state.model.control_ports.push(port);
                }
                _ => unreachable!(),
            }
        }
        Ok(())
    }

    pub async fn register_runtime_hidden_service(
        &self,
        virtual_port: u16,
        target_port: u16,
        temporary: bool,
    ) -> Result<RuntimeHiddenService, TorManagerError> {
        let mut session = self.open_control_session().await?;
        let service = hidden_service::register_runtime(&mut session, virtual_port, target_port, temporary).await?;
        self.runtime_services.lock().await.push(service.clone());
        Ok(service)
    }

    pub async fn list_runtime_hidden_services(&self) -> Vec<RuntimeHiddenService> {
        self.runtime_services.lock().await.clone()
    }

    pub async fn remove_runtime_hidden_service(&self, onion_address: &str) -> Result<(), TorManagerError> {
        let mut session = self.open_control_session().await?;
        hidden_service::remove_runtime(&mut session, onion_address).await?;
        self.runtime_services
            .lock()
            .await
            .retain(|svc| svc.onion_address != onion_address);
        Ok(())
    }

    /// Promote a runtime service to persistent form. Requires the daemon to be
    /// stopped so its key material is not being written concurrently with Tor.
    pub async fn persist_runtime_hidden_service(&self, onion_address: &str) -> Result<usize, TorManagerError> {
        {
            let mut supervisor = self.supervisor.lock().await;
            if supervisor.is_running() {
                return Err(ProcessError::AlreadyRunning.into());
            }
        }

        let runtime = {
            let services = self.runtime_services.lock().await;
            services
                .iter()
                .find(|svc| svc.onion_address == onion_address)
                .cloned()
                .ok_or_else(|| TorManagerError::Precondition(format!("no runtime service for {onion_address}")))?
        };

        let mut state = self.state.lock().await;
        let index = hidden_service::persist_runtime(&mut state.model, &self.paths, &runtime)?;
        drop(state);
        self.runtime_services
            .lock()
            .await
            .retain(|svc| svc.onion_address != onion_address);
        self.save_torrc().await?;
        Ok(index)
    }
}
