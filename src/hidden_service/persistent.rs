//! Promotes a runtime hidden service to persistent, on-disk form.

use std::fs;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::registry::next_hidden_service_index;
use crate::error::FsError;
use crate::paths::Paths;
use crate::torrc::{HiddenService, RuntimeHiddenService, TorrcModel};

/// Write `runtime`'s key material into a freshly allocated hidden-service
/// directory, add a corresponding [`HiddenService`] to `model`, and return its
/// index. Requires the caller to have already stopped the daemon (enforced by the
/// facade, not here).
pub fn persist_runtime(
    model: &mut TorrcModel,
    paths: &Paths,
    runtime: &RuntimeHiddenService,
) -> Result<usize, FsError> {
    let index = next_hidden_service_index(paths);
    let directory = paths.hidden_service_dir(index);

    fs::create_dir_all(&directory)?;
    set_private_permissions(&directory)?;

    let secret_key_bytes = decode_service_key(&runtime.service_key)
        .map_err(|_| FsError::KeyMaterialCorrupt(directory.join("hs_ed25519_secret_key")))?;
    fs::write(directory.join("hs_ed25519_secret_key"), &secret_key_bytes)?;
    // Tor rewrites this on next start; an empty placeholder keeps the directory
    // shape consistent in the meantime. The onion address is already known from
    // the `ADD_ONION` reply and kept on the model below, so nothing is lost by
    // not pre-populating the file Tor itself owns.
    fs::write(directory.join("hostname"), "")?;

    let mut hs = HiddenService::new(directory, runtime.virtual_port, runtime.target_port);
    hs.preconfig = true;
    hs.host = Some(runtime.onion_address.clone());
    hs.secret_key = Some(secret_key_bytes);
    model.hidden_services.push(hs);

    Ok(index as usize)
}

/// Decode Tor's `"ED25519-V3:<base64>"` private-key blob into raw bytes.
fn decode_service_key(service_key: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let b64 = service_key
        .strip_prefix("ED25519-V3:")
        .unwrap_or(service_key);
    BASE64.decode(b64)
}

#[cfg(unix)]
fn set_private_permissions(path: &std::path::Path) -> Result<(), FsError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_private_permissions(_path: &std::path::Path) -> Result<(), FsError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ed25519_v3_prefixed_key() {
        let blob = format!("ED25519-V3:{}", BASE64.encode(b"raw-key-bytes"));
        let decoded = decode_service_key(&blob).expect("decode");
        assert_eq!(decoded, b"raw-key-bytes");
    }

    #[test]
    fn persist_runtime_writes_key_material_and_hostname() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = Paths::new(Some(tmp.path().to_path_buf()));
        paths.ensure().expect("ensure");
        let mut model = TorrcModel::new(paths.data_dir());

        let runtime = RuntimeHiddenService {
            onion_address: "abcdefghijklmnop.onion".to_string(),
            virtual_port: 80,
            target_port: 5000,
            service_key: format!("ED25519-V3:{}", BASE64.encode(b"secret-bytes")),
            temporary: false,
        };

        let index = persist_runtime(&mut model, &paths, &runtime).expect("persist");
        let dir = paths.hidden_service_dir(index as u64);
        assert!(dir.join("hs_ed25519_secret_key").is_file());
        assert_eq!(fs::read_to_string(dir.join("hostname")).unwrap(), "");
        assert_eq!(model.hidden_services.len(), 1);
        assert_eq!(
            model.hidden_services[0].host,
            Some("abcdefghijklmnop.onion".to_string())
        );
    }
}
