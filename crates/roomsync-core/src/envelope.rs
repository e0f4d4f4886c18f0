use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    error::DecodeError,
    types::{ClientState, EventsDecrypted, SendComplete, SyncComplete, SyncStatus, Typing},
};

/// Typed push payload, one variant per known command tag.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Full session summary.
    ClientState(ClientState),
    /// Sync loop liveness.
    SyncStatus(SyncStatus),
    /// Initial backlog fully delivered.
    InitComplete,
    /// Incremental per-room deltas.
    SyncComplete(SyncComplete),
    /// Decrypted content for rows of one room.
    EventsDecrypted(EventsDecrypted),
    /// Resolution of one pending send.
    SendComplete(SendComplete),
    /// Rotated token for authenticated media.
    ImageAuthToken(String),
    /// Current typing set of one room.
    Typing(Typing),
}

impl PushEvent {
    /// Wire tag of this payload.
    pub fn command(&self) -> &'static str {
        match self {
            Self::ClientState(_) => "client_state",
            Self::SyncStatus(_) => "sync_status",
            Self::InitComplete => "init_complete",
            Self::SyncComplete(_) => "sync_complete",
            Self::EventsDecrypted(_) => "events_decrypted",
            Self::SendComplete(_) => "send_complete",
            Self::ImageAuthToken(_) => "image_auth_token",
            Self::Typing(_) => "typing",
        }
    }

    /// Room scoped by this payload, if it targets exactly one room.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::EventsDecrypted(payload) => Some(&payload.room_id),
            Self::SendComplete(payload) => Some(&payload.room_id),
            Self::Typing(payload) => Some(&payload.room_id),
            _ => None,
        }
    }
}

/// Decoded frame with its correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Zero for unsolicited pushes.
    pub request_id: i64,
    pub event: PushEvent,
}

#[derive(Deserialize)]
struct RawEnvelope {
    command: String,
    #[serde(default)]
    request_id: i64,
    #[serde(default)]
    data: Value,
}

/// Decode one wire frame into a typed push event.
pub fn decode_envelope(frame: &str) -> Result<Envelope, DecodeError> {
    let raw: RawEnvelope =
        serde_json::from_str(frame).map_err(|err| DecodeError::Malformed(err.to_string()))?;
    let event = decode_payload(&raw.command, raw.data)?;
    Ok(Envelope {
        request_id: raw.request_id,
        event,
    })
}

/// Decode the body of an already split envelope.
pub fn decode_payload(command: &str, data: Value) -> Result<PushEvent, DecodeError> {
    let event = match command {
        "client_state" => PushEvent::ClientState(body(command, data)?),
        "sync_status" => PushEvent::SyncStatus(body(command, data)?),
        "init_complete" => PushEvent::InitComplete,
        "sync_complete" => PushEvent::SyncComplete(body(command, data)?),
        "events_decrypted" => PushEvent::EventsDecrypted(body(command, data)?),
        "send_complete" => PushEvent::SendComplete(body(command, data)?),
        "image_auth_token" => PushEvent::ImageAuthToken(body(command, data)?),
        "typing" => PushEvent::Typing(body(command, data)?),
        other => return Err(DecodeError::UnknownCommand(other.to_owned())),
    };
    Ok(event)
}

fn body<T: DeserializeOwned>(command: &str, data: Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|err| DecodeError::InvalidPayload {
        command: command.to_owned(),
        reason: err.to_string(),
    })
}
