//! Translates a parsed [`Command`] into transport calls and the resulting
//! `response`/`error`/`qr` events.

use conduit_protocol::command::{Command, PresenceState as WireProvider};
use conduit_protocol::event::EventEnvelope;
use conduit_protocol::ProtocolError;

use crate::jid::normalize_jid;
use crate::server::BridgeServer;
use crate::transport::{MediaSource, PresenceState, QrOutcome};

pub async fn dispatch_command(state: &BridgeServer, command: Command, request_id: Option<String>) -> Vec<EventEnvelope> {
    let account = state.account_id.clone();
    match command {
        Command::Health => {
            let payload = state.health();
            vec![response(&account, request_id, payload)]
        }

        Command::SendText(p) => {
            let to = normalize_jid(&p.to);
            let quoted = p.reply_to_message_id.as_ref().and_then(|id| state.session.lookup_quote(&to, id));
            match state.transport.send_text(&to, &p.text, quoted.as_ref()).await {
                Ok(message_id) => {
                    state.session.record_outbound_self(&message_id);
                    vec![response(&account, request_id, serde_json::json!({"messageId": message_id}))]
                }
                Err(e) => vec![error_event(&account, request_id, e)],
            }
        }

        Command::SendMedia(p) => {
            let to = normalize_jid(&p.to);
            let quoted = p.reply_to_message_id.as_ref().and_then(|id| state.session.lookup_quote(&to, id));
            let source = if let Some(url) = &p.media_url {
                MediaSource::Url(url.clone())
            } else if let Some(b64) = &p.media_base64 {
                MediaSource::Base64(b64.clone())
            } else if let Some(path) = &p.media_path {
                MediaSource::Path(std::path::PathBuf::from(path))
            } else {
                return vec![error_event(&account, request_id, crate::error::BridgeError::Transport("send_media missing source".into()))];
            };
            match state
                .transport
                .send_media(&to, source, p.mime_type.as_deref(), p.file_name.as_deref(), p.caption.as_deref(), quoted.as_ref())
                .await
            {
                Ok(message_id) => {
                    state.session.record_outbound_self(&message_id);
                    vec![response(&account, request_id, serde_json::json!({"messageId": message_id}))]
                }
                Err(e) => vec![error_event(&account, request_id, e)],
            }
        }

        Command::SendPoll(p) => {
            let to = normalize_jid(&p.to);
            match state.transport.send_poll(&to, &p.question, &p.options, p.max_selections).await {
                Ok(message_id) => {
                    state.session.record_outbound_self(&message_id);
                    vec![response(&account, request_id, serde_json::json!({"messageId": message_id}))]
                }
                Err(e) => vec![error_event(&account, request_id, e)],
            }
        }

        Command::React(p) => {
            let chat = normalize_jid(&p.chat_jid);
            match state
                .transport
                .react(&chat, &p.message_id, &p.emoji, p.participant_jid.as_deref(), p.from_me)
                .await
            {
                Ok(()) => vec![response(&account, request_id, serde_json::json!({"ok": true}))],
                Err(e) => vec![error_event(&account, request_id, e)],
            }
        }

        Command::PresenceUpdate(p) => {
            let state_wire = map_presence(p.state);
            let chat = p.chat_jid.as_deref().map(normalize_jid);
            match state.transport.presence_update(state_wire, chat.as_deref()).await {
                Ok(()) => vec![response(&account, request_id, serde_json::json!({"ok": true}))],
                Err(e) => vec![error_event(&account, request_id, e)],
            }
        }

        Command::ListGroups(p) => match state.transport.list_groups(p.ids.as_deref()).await {
            Ok(groups) => vec![response(&account, request_id, serde_json::json!({"groups": groups}))],
            Err(e) => vec![error_event(&account, request_id, e)],
        },

        Command::LoginStart(p) => {
            let timeout = p.timeout_ms.unwrap_or(30_000);
            match state.transport.login_start(p.force, timeout).await {
                Ok(QrOutcome::Qr(qr)) => {
                    state.session.latch_qr(qr.clone());
                    vec![EventEnvelope::new(conduit_protocol::event::EventKind::Qr, account, serde_json::json!({"qr": qr})).with_request_id_opt(request_id)]
                }
                Ok(QrOutcome::Connected) => {
                    state.session.clear_qr();
                    vec![response(&account, request_id, serde_json::json!({"status": "connected"}))]
                }
                Ok(QrOutcome::TimedOut) => {
                    vec![error_event(&account, request_id, crate::error::BridgeError::LoginTimeout)]
                }
                Err(e) => vec![error_event(&account, request_id, e)],
            }
        }

        Command::LoginWait(p) => {
            let timeout = p.timeout_ms.unwrap_or(30_000);
            match state.transport.login_wait(timeout).await {
                Ok(QrOutcome::Qr(qr)) => {
                    state.session.latch_qr(qr.clone());
                    vec![EventEnvelope::new(conduit_protocol::event::EventKind::Qr, account, serde_json::json!({"qr": qr})).with_request_id_opt(request_id)]
                }
                Ok(QrOutcome::Connected) => vec![response(&account, request_id, serde_json::json!({"status": "connected"}))],
                Ok(QrOutcome::TimedOut) => vec![error_event(&account, request_id, crate::error::BridgeError::LoginTimeout)],
                Err(e) => vec![error_event(&account, request_id, e)],
            }
        }

        Command::Logout => match state.transport.logout().await {
            Ok(()) => {
                state.session.clear_qr();
                vec![response(&account, request_id, serde_json::json!({"ok": true}))]
            }
            Err(e) => vec![error_event(&account, request_id, e)],
        },
    }
}

fn map_presence(wire: WireProvider) -> PresenceState {
    match wire {
        WireProvider::Available => PresenceState::Available,
        WireProvider::Unavailable => PresenceState::Unavailable,
        WireProvider::Composing => PresenceState::Composing,
        WireProvider::Paused => PresenceState::Paused,
        WireProvider::Recording => PresenceState::Recording,
    }
}

fn response(account: &str, request_id: Option<String>, payload: impl serde::Serialize) -> EventEnvelope {
    match request_id {
        Some(id) => EventEnvelope::response(account, id, payload),
        None => EventEnvelope::new(conduit_protocol::event::EventKind::Response, account, payload),
    }
}

fn error_event(account: &str, request_id: Option<String>, err: crate::error::BridgeError) -> EventEnvelope {
    let wire = ProtocolError::Internal(err.to_string()).to_wire("");
    EventEnvelope::error(account, wire, request_id)
}
