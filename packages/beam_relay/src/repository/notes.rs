use anyhow::{Context, Result};
use sqlx::Row;

use crate::models::Note;

use super::RelayRepository;

impl RelayRepository {
    pub async fn insert_note(&self, note: &Note) -> Result<()> {
        let json_content = note
            .json_content
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize note json_content")?;

        sqlx::query(
            r#"
            INSERT INTO notes (id, user_id, beam_id, title, content, json_content, note_type, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&note.id)
        .bind(&note.user_id)
        .bind(&note.beam_id)
        .bind(&note.title)
        .bind(&note.content)
        .bind(json_content)
        .bind(&note.note_type)
        .bind(note.created_at)
        .bind(note.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert note")?;

        Ok(())
    }

    /// All notes captured for a beam, oldest first.
    pub async fn list_beam_notes(&self, beam_id: &str) -> Result<Vec<Note>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, beam_id, title, content, json_content, note_type, created_at, updated_at
            FROM notes
            WHERE beam_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(beam_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list beam notes")?;

        rows.into_iter()
            .map(|r| {
                let json_content: Option<String> = r.get("json_content");
                let json_content = json_content
                    .map(|s| serde_json::from_str(&s))
                    .transpose()
                    .context("Corrupt note json_content")?;
                Ok(Note {
                    id: r.get("id"),
                    user_id: r.get("user_id"),
                    beam_id: r.get("beam_id"),
                    title: r.get("title"),
                    content: r.get("content"),
                    json_content,
                    note_type: r.get("note_type"),
                    created_at: r.get("created_at"),
                    updated_at: r.get("updated_at"),
                })
            })
            .collect()
    }
}
