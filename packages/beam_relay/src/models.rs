//! Database row types shared across the repository and relay layers.

use serde::{Deserialize, Serialize};

/// Clipboard payloads without an explicit type default to plain text.
pub const NOTE_TYPE_TEXT: &str = "text";
/// Rich-text notes carry structured editor state in `json_content`.
pub const NOTE_TYPE_LEXI: &str = "lexi_note";

/// A relay session. Created out of band (CLI or external tooling);
/// read-only from the hub's perspective. `beam_id` is globally unique
/// and immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beam {
    pub id: i64,
    pub beam_id: String,
    pub beam_key: String,
    pub beam_name: Option<String>,
    /// Set when an application identity claims an anonymous beam.
    pub owner_user_id: Option<String>,
    pub created_at: i64,
}

/// Durable capture of a shared clipboard payload, attributed to both
/// the acting identity and the owning beam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub user_id: String,
    pub beam_id: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub json_content: Option<serde_json::Value>,
    pub note_type: String,
    pub created_at: i64,
    pub updated_at: i64,
}
