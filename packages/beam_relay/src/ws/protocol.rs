//! Wire protocol types for the beam relay.
//!
//! Inbound traffic is the generic `{type, message, extra}` envelope;
//! known outbound shapes are `ServerMessage` variants. Envelopes with
//! an unrecognized type are forwarded verbatim, so the inbound side
//! stays a loose struct rather than a closed enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of wire communication. `extra` is always present on the
/// wire (null when the client omitted it) so forwarded envelopes keep
/// a stable shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: Value,
    #[serde(default)]
    pub extra: Option<Value>,
}

/// A participant's relay-level identity, assigned at auth time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeamMember {
    pub client_id: String,
    pub nickname: String,
}

/// Known outbound message shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthSuccess { message: BeamMember },
    AuthFailed { message: String },
    Message { message: Value },
    AuthedUsers { users: Vec<BeamMember> },
    ShareClipboard {
        message: Value,
        extra: Value,
        is_original_sender: bool,
    },
    ProtocolError { message: String },
}

/// Event flowing through a connection's outbound queue. Group fan-out
/// delivers the same event to every member; per-connection rendering
/// (the clipboard origin flag) happens at the outbound edge.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Already-shaped message (unicast or membership-wide).
    Direct(ServerMessage),
    /// Unrecognized envelope forwarded verbatim.
    Forward(Envelope),
    /// Clipboard share carrying the publisher's connection id; the
    /// receiving edge turns it into `share_clipboard` with
    /// `is_original_sender` resolved against its own connection.
    Clipboard {
        message: Value,
        extra: Value,
        origin: String,
    },
}
