//! Parses Tor control-port reply lines.
//!
//! Grounded in the pack's `TorControlPortClient` line-protocol handling: a reply is
//! one or more lines sharing a status code, each either a continuation (`-`), the
//! start of a multi-line data block (`+`, terminated by a lone `.`), or the final
//! line (` `).

use crate::error::ControlError;

/// One fully-assembled control-port reply: the final status code, every status
/// line's text (continuation and final lines), and every line from `+`-introduced
/// data blocks, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub status_lines: Vec<String>,
    pub data_lines: Vec<String>,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        self.code == 250
    }

    /// Convenience accessor for single-line `KEY=VALUE` style status text, as
    /// returned by `GETINFO`/`GETCONF`.
    pub fn value_for_key(&self, key: &str) -> Option<&str> {
        self.status_lines
            .iter()
            .chain(self.data_lines.iter())
            .find_map(|line| line.strip_prefix(&format!("{key}=")))
    }
}

enum ParsedLine<'a> {
    Continuation(u16, &'a str),
    DataBlockStart(u16, &'a str),
    Final(u16, &'a str),
}

fn split_line(line: &str) -> Result<ParsedLine<'_>, ControlError> {
    if line.len() < 4 {
        return Err(ControlError::ProtocolError(format!(
            "reply line too short: {line:?}"
        )));
    }
    let (code_str, rest) = line.split_at(3);
    let code: u16 = code_str
        .parse()
        .map_err(|_| ControlError::ProtocolError(format!("bad status code in: {line:?}")))?;
    let (sep, text) = rest.split_at(1);
    match sep {
        "-" => Ok(ParsedLine::Continuation(code, text)),
        "+" => Ok(ParsedLine::DataBlockStart(code, text)),
        " " => Ok(ParsedLine::Final(code, text)),
        other => Err(ControlError::ProtocolError(format!(
            "unexpected separator {other:?} in: {line:?}"
        ))),
    }
}

/// Assemble a full reply from already-read lines (used directly by tests and by
/// [`super::session::ControlSession::read_reply`] once it has collected raw lines).
pub fn assemble_reply(lines: &[String]) -> Result<Reply, ControlError> {
    let mut status_lines = Vec::new();
    let mut data_lines = Vec::new();
    let mut final_code = None;
    let mut in_data_block = false;

    for line in lines {
        if in_data_block {
            if line == "." {
                in_data_block = false;
            } else {
                data_lines.push(line.clone());
            }
            continue;
        }

        match split_line(line)? {
            ParsedLine::Continuation(_, text) => status_lines.push(text.to_string()),
            ParsedLine::DataBlockStart(_, text) => {
                status_lines.push(text.to_string());
                in_data_block = true;
            }
            ParsedLine::Final(code, text) => {
                status_lines.push(text.to_string());
                final_code = Some(code);
            }
        }
    }

    let code = final_code.ok_or_else(|| {
        ControlError::ProtocolError("reply never reached a final line".to_string())
    })?;

    Ok(Reply {
        code,
        status_lines,
        data_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_line_ok() {
        let lines = vec!["250 OK".to_string()];
        let reply = assemble_reply(&lines).expect("parse");
        assert_eq!(reply.code, 250);
        assert!(reply.is_success());
        assert_eq!(reply.status_lines, vec!["OK".to_string()]);
    }

    #[test]
    fn parses_multiline_data_block() {
        let lines = vec![
            "250+onions/current=".to_string(),
            "abc123xyz.onion".to_string(),
            "def456uvw.onion".to_string(),
            ".".to_string(),
            "250 OK".to_string(),
        ];
        let reply = assemble_reply(&lines).expect("parse");
        assert_eq!(reply.code, 250);
        assert_eq!(
            reply.data_lines,
            vec!["abc123xyz.onion".to_string(), "def456uvw.onion".to_string()]
        );
    }

    #[test]
    fn parses_key_value_status_line() {
        let lines = vec!["250 version=0.4.8.12".to_string()];
        let reply = assemble_reply(&lines).expect("parse");
        assert_eq!(reply.value_for_key("version"), Some("0.4.8.12"));
    }

    #[test]
    fn error_status_is_preserved() {
        let lines = vec!["515 Authentication failed".to_string()];
        let reply = assemble_reply(&lines).expect("parse");
        assert_eq!(reply.code, 515);
        assert!(!reply.is_success());
    }

    #[test]
    fn rejects_line_with_no_final() {
        let lines = vec!["250-still going".to_string()];
        assert!(assemble_reply(&lines).is_err());
    }
}
