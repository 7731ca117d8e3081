//! Runtime (ephemeral or detached) hidden services via `ADD_ONION`/`DEL_ONION`.

use crate::control::{commands, AddOnionFlag, ControlSession};
use crate::error::ControlError;
use crate::torrc::RuntimeHiddenService;

/// Issue `ADD_ONION` and build a [`RuntimeHiddenService`] from the reply. If
/// `temporary` is false, `Flags=Detach` is set so the service survives the
/// control connection closing.
pub async fn register_runtime(
    session: &mut ControlSession,
    virtual_port: u16,
    target_port: u16,
    temporary: bool,
) -> Result<RuntimeHiddenService, ControlError> {
    let flags: &[AddOnionFlag] = if temporary { &[] } else { &[AddOnionFlag::Detach] };
    let cmd = commands::add_onion(None, virtual_port, target_port, flags);
    let replies = session.send(&[cmd]).await?;
    let (_, reply) = replies.into_iter().next().expect("exactly one command sent");

    if !reply.is_success() {
        return Err(ControlError::CommandRejected {
            code: reply.code,
            text: reply.status_lines.join("; "),
        });
    }

    let service_id = reply
        .value_for_key("ServiceID")
        .ok_or_else(|| ControlError::ProtocolError("ADD_ONION reply missing ServiceID".to_string()))?
        .to_string();
    let private_key = reply
        .value_for_key("PrivateKey")
        .ok_or_else(|| ControlError::ProtocolError("ADD_ONION reply missing PrivateKey".to_string()))?
        .to_string();

    Ok(RuntimeHiddenService {
        onion_address: format!("{service_id}.onion"),
        virtual_port,
        target_port,
        service_key: private_key,
        temporary,
    })
}

/// Issue `DEL_ONION` for the stem of `onion_address` (the part before `.onion`).
pub async fn remove_runtime(
    session: &mut ControlSession,
    onion_address: &str,
) -> Result<(), ControlError> {
    let stem = onion_address.trim_end_matches(".onion");
    let cmd = commands::del_onion(stem);
    let replies = session.send(&[cmd]).await?;
    let (_, reply) = replies.into_iter().next().expect("exactly one command sent");

    if reply.is_success() {
        Ok(())
    } else {
        Err(ControlError::CommandRejected {
            code: reply.code,
            text: reply.status_lines.join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Reply;

    #[test]
    fn onion_address_strips_suffix_for_del_onion() {
        let stem = "abcdefghijklmnop".trim_end_matches(".onion");
        assert_eq!(commands::del_onion(stem), "DEL_ONION abcdefghijklmnop");
    }

    #[test]
    fn reply_value_extraction_shapes_runtime_service() {
        let reply = Reply {
            code: 250,
            status_lines: vec![
                "ServiceID=abcdefghijklmnopqrstuvwxyz234567abcdefghijklmnopqrstuv".to_string(),
                "PrivateKey=ED25519-V3:AAAA".to_string(),
                "OK".to_string(),
            ],
            data_lines: vec![],
        };
        assert_eq!(
            reply.value_for_key("ServiceID"),
            Some("abcdefghijklmnopqrstuvwxyz234567abcdefghijklmnopqrstuv")
        );
        assert_eq!(reply.value_for_key("PrivateKey"), Some("ED25519-V3:AAAA"));
    }
}
