//! Serializes a [`TorrcModel`] to torrc text.

use super::model::{AuthMode, TorrcModel};

/// Render `model` to torrc text: `DataDirectory`, `Log`, the authentication
/// directive, every `SocksPort`, every `ControlPort`, then each hidden service as a
/// contiguous `HiddenServiceDir`/`HiddenServicePort`/`HiddenServiceVersion` triple.
///
/// Always LF-terminated, UTF-8. This ordering is load-bearing: [`super::parse::parse`]
/// does not require it, but round-tripping through `render` then `parse` must
/// reproduce an equal model, so the order is kept stable across releases.
pub fn render(model: &TorrcModel) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "DataDirectory {}\n",
        model.data_directory.display()
    ));
    out.push_str(&format!("Log {}\n", model.log_level));

    match &model.auth_mode {
        AuthMode::Cookie => out.push_str("CookieAuthentication 1\n"),
        AuthMode::HashedPassword(hash) => {
            out.push_str(&format!("HashedControlPassword {hash}\n"))
        }
    }

    for port in model.socks_ports.ports() {
        out.push_str(&format!("SocksPort {port}\n"));
    }

    for port in model.control_ports.ports() {
        out.push_str(&format!("ControlPort {port}\n"));
    }

    for hs in &model.hidden_services {
        out.push_str(&format!("HiddenServiceDir {}\n", hs.directory.display()));
        out.push_str(&format!(
            "HiddenServicePort {} 127.0.0.1:{}\n",
            hs.virtual_port, hs.target_port
        ));
        out.push_str("HiddenServiceVersion 3\n");
    }

    out
}
