//! Parses torrc text back into a [`TorrcModel`].

use std::path::PathBuf;

use tracing::warn;

use super::model::{AuthMode, HiddenService, TorrcModel};
use crate::error::ConfigError;

/// Parse `text` into a [`TorrcModel`]. Unknown directives are ignored with a
/// `tracing::warn!`. Tolerant of CRLF line endings.
pub fn parse(text: &str) -> Result<TorrcModel, ConfigError> {
    let mut data_directory = PathBuf::new();
    let mut log_level = "notice stdout".to_string();
    let mut auth_mode = AuthMode::Cookie;
    let mut socks_ports = Vec::new();
    let mut control_ports = Vec::new();
    let mut hidden_services: Vec<HiddenService> = Vec::new();

    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r').trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let directive = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim();

        match directive {
            "DataDirectory" => data_directory = PathBuf::from(rest),
            "Log" => log_level = rest.to_string(),
            "CookieAuthentication" => {
                if rest == "1" {
                    auth_mode = AuthMode::Cookie;
                }
            }
            "HashedControlPassword" => auth_mode = AuthMode::HashedPassword(rest.to_string()),
            "SocksPort" => {
                if let Some(port) = parse_port_directive(rest) {
                    socks_ports.push(port);
                }
            }
            "ControlPort" => {
                if let Some(port) = parse_port_directive(rest) {
                    control_ports.push(port);
                }
            }
            "HiddenServiceDir" => {
                hidden_services.push(HiddenService::new(PathBuf::from(rest), 0, 0));
            }
            "HiddenServicePort" => {
                let Some(current) = hidden_services.last_mut() else {
                    return Err(ConfigError::MalformedTorrc(
                        "HiddenServicePort with no preceding HiddenServiceDir".to_string(),
                    ));
                };
                let (virtual_port, target_port) = parse_hidden_service_port(rest)?;
                current.virtual_port = virtual_port;
                current.target_port = target_port;
            }
            "HiddenServiceVersion" => {
                // Only v3 is supported; nothing further to record on the model.
            }
            other => {
                warn!(directive = other, "ignoring unknown torrc directive");
            }
        }
    }

    let mut model = TorrcModel::new(data_directory);
    model.log_level = log_level;
    model.auth_mode = auth_mode;
    for port in socks_ports {
        model.socks_ports.push(port);
    }
    for port in control_ports {
        model.control_ports.push(port);
    }
    model.hidden_services = hidden_services;

    Ok(model)
}

/// Accepts a bare port, `address:port`, or `auto`. Only numeric forms populate the
/// ListenerSet — `auto` is accepted syntactically but produces no entry since this
/// crate always assigns explicit ports through the allocator.
fn parse_port_directive(value: &str) -> Option<u16> {
    if value.eq_ignore_ascii_case("auto") {
        return None;
    }
    if let Some((_, port)) = value.rsplit_once(':') {
        return port.parse().ok();
    }
    value.parse().ok()
}

fn parse_hidden_service_port(value: &str) -> Result<(u16, u16), ConfigError> {
    let mut fields = value.split_whitespace();
    let virtual_port: u16 = fields
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ConfigError::MalformedTorrc(format!("bad HiddenServicePort: {value}")))?;
    let target = fields
        .next()
        .ok_or_else(|| ConfigError::MalformedTorrc(format!("bad HiddenServicePort: {value}")))?;
    let target_port: u16 = target
        .rsplit_once(':')
        .map(|(_, p)| p)
        .unwrap_or(target)
        .parse()
        .map_err(|_| ConfigError::MalformedTorrc(format!("bad HiddenServicePort: {value}")))?;
    Ok((virtual_port, target_port))
}
