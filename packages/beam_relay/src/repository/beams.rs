use anyhow::{Context, Result};
use sqlx::Row;

use crate::models::Beam;

use super::RelayRepository;

impl RelayRepository {
    pub async fn create_beam(
        &self,
        beam_id: &str,
        beam_key: &str,
        beam_name: Option<&str>,
    ) -> Result<Beam> {
        let created_at = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO beams (beam_id, beam_key, beam_name, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(beam_id)
        .bind(beam_key)
        .bind(beam_name)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert beam")?;

        Ok(Beam {
            id: result.last_insert_rowid(),
            beam_id: beam_id.to_string(),
            beam_key: beam_key.to_string(),
            beam_name: beam_name.map(str::to_string),
            owner_user_id: None,
            created_at,
        })
    }

    pub async fn get_beam(&self, beam_id: &str) -> Result<Option<Beam>> {
        let row = sqlx::query(
            r#"
            SELECT id, beam_id, beam_key, beam_name, owner_user_id, created_at
            FROM beams
            WHERE beam_id = ?
            "#,
        )
        .bind(beam_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up beam")?;

        Ok(row.map(|r| Beam {
            id: r.get("id"),
            beam_id: r.get("beam_id"),
            beam_key: r.get("beam_key"),
            beam_name: r.get("beam_name"),
            owner_user_id: r.get("owner_user_id"),
            created_at: r.get("created_at"),
        }))
    }

    /// Claim an anonymous beam for an identity. Only succeeds while the
    /// beam has no owner; an already-owned beam is left untouched.
    /// Returns true if the claim landed.
    pub async fn attach_owner(
        &self,
        beam_id: &str,
        user_id: &str,
        beam_name: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE beams
            SET owner_user_id = ?, beam_name = COALESCE(?, beam_name)
            WHERE beam_id = ? AND owner_user_id IS NULL
            "#,
        )
        .bind(user_id)
        .bind(beam_name)
        .bind(beam_id)
        .execute(&self.pool)
        .await
        .context("Failed to attach beam owner")?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_helpers::test_repository;

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let repo = test_repository().await;
        let beam = repo
            .create_beam("beam-1", "secret-key", Some("Desk share"))
            .await
            .unwrap();
        assert_eq!(beam.beam_id, "beam-1");

        let loaded = repo.get_beam("beam-1").await.unwrap().unwrap();
        assert_eq!(loaded.beam_key, "secret-key");
        assert_eq!(loaded.beam_name.as_deref(), Some("Desk share"));
        assert!(loaded.owner_user_id.is_none());
    }

    #[tokio::test]
    async fn get_missing_beam_is_none() {
        let repo = test_repository().await;
        assert!(repo.get_beam("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn attach_owner_claims_once() {
        let repo = test_repository().await;
        repo.create_user("u1", "alice", "Alice").await.unwrap();
        repo.create_user("u2", "bob", "Bob").await.unwrap();
        repo.create_beam("beam-1", "k", None).await.unwrap();

        assert!(repo.attach_owner("beam-1", "u1", Some("Mine")).await.unwrap());
        // Second claim bounces off the existing owner
        assert!(!repo.attach_owner("beam-1", "u2", None).await.unwrap());

        let beam = repo.get_beam("beam-1").await.unwrap().unwrap();
        assert_eq!(beam.owner_user_id.as_deref(), Some("u1"));
        assert_eq!(beam.beam_name.as_deref(), Some("Mine"));
    }
}
