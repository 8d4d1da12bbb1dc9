//! Clipboard persistence: turns a shared clipboard payload into a
//! durable Note attributed to the acting identity and the owning beam.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::identity::Identity;
use crate::models::{NOTE_TYPE_LEXI, NOTE_TYPE_TEXT, Note};
use crate::repository::RelayRepository;

#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    #[error("beam not found: {0}")]
    BeamNotFound(String),
    #[error("persistence timed out")]
    Timeout,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct ClipboardPersister {
    repository: Arc<RelayRepository>,
    timeout: Duration,
}

impl ClipboardPersister {
    pub fn new(repository: Arc<RelayRepository>, timeout: Duration) -> Self {
        Self {
            repository,
            timeout,
        }
    }

    /// Persist one shared clipboard payload. Bounded by the configured
    /// timeout; the caller logs failures and carries on — delivery of
    /// the broadcast never depends on this call.
    pub async fn persist(
        &self,
        beam_id: &str,
        content: &Value,
        content_type: &Value,
        identity: &Identity,
    ) -> Result<Note, ClipboardError> {
        tokio::time::timeout(self.timeout, self.persist_inner(beam_id, content, content_type, identity))
            .await
            .map_err(|_| ClipboardError::Timeout)?
    }

    async fn persist_inner(
        &self,
        beam_id: &str,
        content: &Value,
        content_type: &Value,
        identity: &Identity,
    ) -> Result<Note, ClipboardError> {
        let beam = self
            .repository
            .get_beam(beam_id)
            .await?
            .ok_or_else(|| ClipboardError::BeamNotFound(beam_id.to_string()))?;

        let note = build_note(&beam.beam_id, content, content_type, identity);
        self.repository.insert_note(&note).await?;
        Ok(note)
    }
}

/// Map a clipboard payload onto a Note row. `lexi_note` payloads carry
/// `{title, content}` and land as structured `json_content`; everything
/// else is stored as plain content under its declared type.
fn build_note(beam_id: &str, content: &Value, content_type: &Value, identity: &Identity) -> Note {
    let note_type = content_type.as_str().unwrap_or(NOTE_TYPE_TEXT).to_string();
    let now = chrono::Utc::now().timestamp();

    let mut note = Note {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: identity.user_id.clone(),
        beam_id: beam_id.to_string(),
        title: None,
        content: None,
        json_content: None,
        note_type,
        created_at: now,
        updated_at: now,
    };

    if note.note_type == NOTE_TYPE_LEXI {
        note.title = content
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);
        note.json_content = content.get("content").cloned();
    } else {
        note.content = Some(match content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    }

    note
}
