//! Control-protocol command string builders.
//!
//! The `ADD_ONION` flag set and command-string shape is grounded in the pack's
//! `AddOnion`/`AddOnionFlag` command builder.

/// Flags accepted by `ADD_ONION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOnionFlag {
    DiscardPk,
    Detach,
    BasicAuth,
    NonAnonymous,
    MaxStreamsCloseCircuit,
}

impl AddOnionFlag {
    fn as_str(self) -> &'static str {
        match self {
            AddOnionFlag::DiscardPk => "DiscardPK",
            AddOnionFlag::Detach => "Detach",
            AddOnionFlag::BasicAuth => "BasicAuth",
            AddOnionFlag::NonAnonymous => "NonAnonymous",
            AddOnionFlag::MaxStreamsCloseCircuit => "MaxStreamsCloseCircuit",
        }
    }
}

/// Build an `ADD_ONION` command. `key_blob` is `None` to ask Tor to generate a new
/// `ED25519-V3` key, or `Some("ED25519-V3:<base64>")` to restore one.
pub fn add_onion(
    key_blob: Option<&str>,
    virtual_port: u16,
    target_port: u16,
    flags: &[AddOnionFlag],
) -> String {
    let key = key_blob.unwrap_or("NEW:ED25519-V3");
    let mut cmd = format!("ADD_ONION {key} Port={virtual_port},127.0.0.1:{target_port}");
    if !flags.is_empty() {
        let flag_list = flags
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(",");
        cmd.push_str(&format!(" Flags={flag_list}"));
    }
    cmd
}

pub fn del_onion(service_id: &str) -> String {
    format!("DEL_ONION {service_id}")
}

pub fn get_info(keyword: &str) -> String {
    format!("GETINFO {keyword}")
}

pub fn get_conf(keyword: &str) -> String {
    format!("GETCONF {keyword}")
}

pub fn set_conf(assignments: &[(&str, String)]) -> String {
    let body = assignments
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!("SETCONF {body}")
}

pub fn reset_conf(keywords: &[&str]) -> String {
    format!("RESETCONF {}", keywords.join(" "))
}

pub fn signal(name: &str) -> String {
    format!("SIGNAL {name}")
}

pub fn authenticate(token: &str) -> String {
    if token.is_empty() {
        "AUTHENTICATE".to_string()
    } else {
        format!("AUTHENTICATE {token}")
    }
}

pub fn protocolinfo() -> String {
    "PROTOCOLINFO 1".to_string()
}
