//! Registers persistent hidden services and refreshes their on-disk state.
//!
//! Generalizes `privacy::ctor::CTorHiddenService`'s single hardcoded hostname-file
//! poll into a registry that manages many numbered service directories.

use std::fs;

use tracing::warn;

use crate::error::{ConfigError, FsError};
use crate::paths::Paths;
use crate::ports::{PortAllocator, PortRole};
use crate::torrc::{HiddenService, TorrcModel};

/// Find the next unused `hs_<n>` index by scanning the hidden-services directory,
/// so indices stay monotonically increasing even across a `recover=true` restart.
pub(crate) fn next_hidden_service_index(paths: &Paths) -> u64 {
    let dir = paths.hidden_services_dir();
    let Ok(entries) = fs::read_dir(&dir) else {
        return 0;
    };

    entries
        .flatten()
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("hs_"))
                .and_then(|n| n.parse::<u64>().ok())
        })
        .max()
        .map(|max| max + 1)
        .unwrap_or(0)
}

/// Register a new persistent hidden service. Bounded by `max_hidden_services`,
/// enforced strictly as a hard error past the bound.
pub fn register_hidden_service(
    model: &mut TorrcModel,
    paths: &Paths,
    allocator: &mut PortAllocator,
    virtual_port: u16,
    mut target_port: u16,
    preconfig: bool,
    collision_resolve: bool,
    max_hidden_services: usize,
    max_port_resolve_attempts: u32,
) -> Result<usize, ConfigError> {
    if model.hidden_services.len() >= max_hidden_services {
        return Err(ConfigError::CapacityExceeded(format!(
            "hidden service limit of {max_hidden_services} reached"
        )));
    }

    if model.hidden_service_virtual_target_collision(virtual_port, target_port) {
        if collision_resolve {
            target_port = resolve_target_collision(
                model,
                allocator,
                virtual_port,
                target_port,
                max_port_resolve_attempts,
            )?;
        } else {
            return Err(ConfigError::DuplicateHiddenService {
                virtual_port,
                target_port,
            });
        }
    }

    let index = next_hidden_service_index(paths);
    let directory = paths.hidden_service_dir(index);

    fs::create_dir_all(&directory)?;
    set_private_permissions(&directory)?;

    let mut hs = HiddenService::new(directory, virtual_port, target_port);
    hs.preconfig = preconfig;
    model.hidden_services.push(hs);

    Ok(index as usize)
}

/// Create a hidden-service directory with owner-only permissions on Unix, the way
/// `privacy::ctor::CTorHiddenService::start` creates its own hidden-service
/// directory before Tor ever touches it. A no-op permission-wise on platforms
/// without POSIX mode bits.
#[cfg(unix)]
fn set_private_permissions(path: &std::path::Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_private_permissions(_path: &std::path::Path) -> Result<(), ConfigError> {
    Ok(())
}

/// Bump `target_port` forward until it collides with neither an existing hidden
/// service's target in `model` nor a port already bindable-checked this session.
/// The Port Allocator alone only knows about SOCKS/control listeners and session
/// claims, not hidden-service targets, so the model collision check happens here.
fn resolve_target_collision(
    model: &TorrcModel,
    allocator: &mut PortAllocator,
    virtual_port: u16,
    requested: u16,
    max_attempts: u32,
) -> Result<u16, ConfigError> {
    let mut candidate = requested;
    for _ in 0..max_attempts {
        candidate = candidate
            .checked_add(1)
            .ok_or(ConfigError::PortResolveExhausted {
                requested,
                attempts: max_attempts,
            })?;
        if model.hidden_service_virtual_target_collision(virtual_port, candidate) {
            continue;
        }
        if let Ok(resolved) = allocator.reserve(candidate, PortRole::HiddenServiceTarget, true, 1) {
            return Ok(resolved);
        }
    }
    Err(ConfigError::PortResolveExhausted {
        requested,
        attempts: max_attempts,
    })
}

/// Walk every hidden-service directory and, where `hostname` exists, load `host`
/// into the model. Missing files leave prior values untouched.
pub fn refresh_all(model: &mut TorrcModel, _paths: &Paths) -> Result<(), FsError> {
    for hs in model.hidden_services.iter_mut() {
        let hostname_path = hs.directory.join("hostname");
        if hostname_path.is_file() {
            match fs::read_to_string(&hostname_path) {
                Ok(contents) => hs.host = Some(contents.trim().to_string()),
                Err(e) => warn!(path = %hostname_path.display(), error = %e, "failed reading hostname file"),
            }
        }

        let pk_path = hs.directory.join("hs_ed25519_public_key");
        if let Ok(bytes) = fs::read(&pk_path) {
            hs.public_key = Some(bytes);
        }
        let sk_path = hs.directory.join("hs_ed25519_secret_key");
        if let Ok(bytes) = fs::read(&sk_path) {
            hs.secret_key = Some(bytes);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn next_index_is_zero_for_empty_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = Paths::new(Some(tmp.path().to_path_buf()));
        paths.ensure().expect("ensure");
        assert_eq!(next_hidden_service_index(&paths), 0);
    }

    #[test]
    fn next_index_continues_from_existing_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = Paths::new(Some(tmp.path().to_path_buf()));
        paths.ensure().expect("ensure");
        fs::create_dir_all(paths.hidden_service_dir(0)).unwrap();
        fs::create_dir_all(paths.hidden_service_dir(3)).unwrap();
        assert_eq!(next_hidden_service_index(&paths), 4);
    }

    #[test]
    fn register_enforces_capacity() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = Paths::new(Some(tmp.path().to_path_buf()));
        paths.ensure().expect("ensure");
        let mut model = TorrcModel::new(paths.data_dir());
        let mut allocator = PortAllocator::new();

        model
            .hidden_services
            .push(HiddenService::new(PathBuf::from("/x"), 80, 5000));

        let result = register_hidden_service(
            &mut model,
            &paths,
            &mut allocator,
            443,
            5001,
            false,
            true,
            1,
            20,
        );
        assert!(matches!(result, Err(ConfigError::CapacityExceeded(_))));
    }

    #[test]
    fn register_resolves_collision_when_enabled() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = Paths::new(Some(tmp.path().to_path_buf()));
        paths.ensure().expect("ensure");
        let mut model = TorrcModel::new(paths.data_dir());
        let mut allocator = PortAllocator::new();

        register_hidden_service(&mut model, &paths, &mut allocator, 80, 5000, false, true, 20, 20)
            .expect("first registration");
        register_hidden_service(&mut model, &paths, &mut allocator, 80, 5000, false, true, 20, 20)
            .expect("second registration resolves collision");

        assert_eq!(model.hidden_services.len(), 2);
        assert_ne!(
            model.hidden_services[0].target_port,
            model.hidden_services[1].target_port
        );
    }

    #[test]
    fn register_creates_the_hidden_service_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = Paths::new(Some(tmp.path().to_path_buf()));
        paths.ensure().expect("ensure");
        let mut model = TorrcModel::new(paths.data_dir());
        let mut allocator = PortAllocator::new();

        let index = register_hidden_service(&mut model, &paths, &mut allocator, 80, 5000, false, true, 20, 20)
            .expect("register");

        let directory = paths.hidden_service_dir(index as u64);
        assert!(directory.is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&directory).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
