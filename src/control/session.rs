//! An authenticated control-port TCP session.
//!
//! Transport is plain buffered line reads over `tokio::net::TcpStream`
//! (`AsyncBufReadExt::lines()`), generalizing the line-oriented approach other
//! control clients in the retrieval pack build on framed codecs for — this crate
//! stays on plain buffered reads since nothing else here pulls in `tokio-util`.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::commands;
use super::parse::{assemble_reply, Reply};
use crate::error::ControlError;

/// What the daemon's `PROTOCOLINFO` reply says callers must do to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequirement {
    Cookie(PathBuf),
    HashedPassword,
    Null,
}

pub struct ControlSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    read_timeout: Duration,
}

impl ControlSession {
    pub async fn connect(control_port: u16, read_timeout: Duration) -> Result<Self, ControlError> {
        let stream = TcpStream::connect(("127.0.0.1", control_port))
            .await
            .map_err(ControlError::ConnectionRefused)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            read_timeout,
        })
    }

    /// Run the full `PROTOCOLINFO` → `AUTHENTICATE` handshake. `password` is used
    /// only if the daemon advertises `HASHEDPASSWORD`.
    pub async fn authenticate(&mut self, password: Option<&str>) -> Result<(), ControlError> {
        let reply = self.roundtrip(&commands::protocolinfo()).await?;
        let requirement = parse_auth_requirement(&reply)?;

        let token = match requirement {
            AuthRequirement::Cookie(path) => {
                let cookie = tokio::fs::read(&path)
                    .await
                    .map_err(|e| ControlError::AuthFailed(format!("reading cookie file: {e}")))?;
                hex::encode(cookie)
            }
            AuthRequirement::HashedPassword => {
                let pw = password.ok_or_else(|| {
                    ControlError::AuthFailed(
                        "daemon requires HASHEDPASSWORD but no password was configured".to_string(),
                    )
                })?;
                format!("\"{pw}\"")
            }
            AuthRequirement::Null => String::new(),
        };

        let reply = self.roundtrip(&commands::authenticate(&token)).await?;
        if !reply.is_success() {
            return Err(ControlError::AuthFailed(reply.status_lines.join("; ")));
        }
        Ok(())
    }

    /// Send each command in order over this session and return `(command, reply)`
    /// pairs in the same order. A command rejected by Tor still yields a `Reply`
    /// (with its non-2xx code); callers decide what to do with it.
    pub async fn send(&mut self, commands: &[String]) -> Result<Vec<(String, Reply)>, ControlError> {
        let mut out = Vec::with_capacity(commands.len());
        for cmd in commands {
            let reply = self.roundtrip(cmd).await?;
            out.push((cmd.clone(), reply));
        }
        Ok(out)
    }

    async fn roundtrip(&mut self, command: &str) -> Result<Reply, ControlError> {
        self.send_line(command).await?;
        self.read_reply().await
    }

    async fn send_line(&mut self, line: &str) -> Result<(), ControlError> {
        debug!(line, "sending control command");
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .map_err(ControlError::Io)?;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Reply, ControlError> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let bytes_read = timeout(self.read_timeout, self.reader.read_line(&mut line))
                .await
                .map_err(|_| ControlError::Timeout)?
                .map_err(ControlError::Io)?;
            if bytes_read == 0 {
                return Err(ControlError::ProtocolError(
                    "control connection closed mid-reply".to_string(),
                ));
            }
            let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
            let is_final = is_final_line(&trimmed, &lines);
            lines.push(trimmed);
            if is_final {
                break;
            }
        }
        assemble_reply(&lines)
    }
}

/// Tracks whether we're inside a `+`-introduced data block so a lone `.` there
/// isn't mistaken for anything else, and otherwise recognizes a `NNN ` final line.
fn is_final_line(line: &str, preceding: &[String]) -> bool {
    let mut in_data_block = false;
    for prior in preceding {
        if in_data_block {
            if prior == "." {
                in_data_block = false;
            }
            continue;
        }
        if prior.len() >= 4 && prior.as_bytes()[3] == b'+' {
            in_data_block = true;
        }
    }
    if in_data_block {
        return false;
    }
    line.len() >= 4 && line.as_bytes()[3] == b' '
}

fn parse_auth_requirement(reply: &Reply) -> Result<AuthRequirement, ControlError> {
    let auth_line = reply
        .status_lines
        .iter()
        .chain(reply.data_lines.iter())
        .find(|l| l.starts_with("AUTH "))
        .ok_or_else(|| ControlError::ProtocolError("PROTOCOLINFO missing AUTH line".to_string()))?;

    let methods = auth_line
        .split_whitespace()
        .find_map(|field| field.strip_prefix("METHODS="))
        .unwrap_or_default();

    if methods.contains("COOKIE") {
        let cookie_path = auth_line
            .find("COOKIEFILE=\"")
            .and_then(|start| {
                let rest = &auth_line[start + "COOKIEFILE=\"".len()..];
                rest.find('"').map(|end| &rest[..end])
            })
            .ok_or_else(|| {
                ControlError::ProtocolError("AUTH advertises COOKIE but no COOKIEFILE".to_string())
            })?;
        return Ok(AuthRequirement::Cookie(PathBuf::from(cookie_path)));
    }

    if methods.contains("HASHEDPASSWORD") {
        return Ok(AuthRequirement::HashedPassword);
    }

    if methods.contains("NULL") {
        return Ok(AuthRequirement::Null);
    }

    Err(ControlError::ProtocolError(format!(
        "unsupported authentication methods advertised: {methods}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cookie_auth_requirement() {
        let reply = Reply {
            code: 250,
            status_lines: vec![
                "PROTOCOLINFO 1".to_string(),
                "AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE=\"/tmp/control_auth_cookie\""
                    .to_string(),
                "OK".to_string(),
            ],
            data_lines: vec![],
        };
        let requirement = parse_auth_requirement(&reply).expect("parse");
        assert_eq!(
            requirement,
            AuthRequirement::Cookie(PathBuf::from("/tmp/control_auth_cookie"))
        );
    }

    #[test]
    fn parses_null_auth_requirement() {
        let reply = Reply {
            code: 250,
            status_lines: vec!["AUTH METHODS=NULL".to_string(), "OK".to_string()],
            data_lines: vec![],
        };
        assert_eq!(
            parse_auth_requirement(&reply).expect("parse"),
            AuthRequirement::Null
        );
    }

    #[test]
    fn parses_hashedpassword_auth_requirement() {
        let reply = Reply {
            code: 250,
            status_lines: vec!["AUTH METHODS=HASHEDPASSWORD".to_string(), "OK".to_string()],
            data_lines: vec![],
        };
        assert_eq!(
            parse_auth_requirement(&reply).expect("parse"),
            AuthRequirement::HashedPassword
        );
    }

    #[test]
    fn missing_auth_line_is_protocol_error() {
        let reply = Reply {
            code: 250,
            status_lines: vec!["OK".to_string()],
            data_lines: vec![],
        };
        assert!(parse_auth_requirement(&reply).is_err());
    }
}
