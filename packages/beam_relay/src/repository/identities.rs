use anyhow::{Context, Result};
use sqlx::Row;

use crate::identity::Identity;

use super::RelayRepository;

impl RelayRepository {
    pub async fn create_user(
        &self,
        user_id: &str,
        username: &str,
        display_name: &str,
    ) -> Result<()> {
        sqlx::query("INSERT INTO users (user_id, username, display_name) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(username)
            .bind(display_name)
            .execute(&self.pool)
            .await
            .context("Failed to create user")?;
        Ok(())
    }

    pub async fn create_session(&self, token: &str, user_id: &str, expires_at: i64) -> Result<()> {
        sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(token)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .context("Failed to create session")?;
        Ok(())
    }

    /// Resolve a session token to an application identity.
    /// Expired or unknown tokens resolve to None.
    pub async fn get_session_identity(&self, token: &str) -> Result<Option<Identity>> {
        let now = chrono::Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            SELECT u.user_id, u.display_name
            FROM sessions s
            JOIN users u ON u.user_id = s.user_id
            WHERE s.token = ? AND s.expires_at > ?
            "#,
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to resolve session")?;

        Ok(row.map(|r| Identity {
            user_id: r.get("user_id"),
            display_name: r.get("display_name"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_helpers::test_repository;

    #[tokio::test]
    async fn valid_session_resolves() {
        let repo = test_repository().await;
        repo.create_user("u1", "alice", "Alice").await.unwrap();
        let expires = chrono::Utc::now().timestamp() + 3600;
        repo.create_session("tok-1", "u1", expires).await.unwrap();

        let identity = repo.get_session_identity("tok-1").await.unwrap().unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.display_name, "Alice");
    }

    #[tokio::test]
    async fn expired_session_is_anonymous() {
        let repo = test_repository().await;
        repo.create_user("u1", "alice", "Alice").await.unwrap();
        let expired = chrono::Utc::now().timestamp() - 1;
        repo.create_session("tok-1", "u1", expired).await.unwrap();

        assert!(repo.get_session_identity("tok-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_token_is_anonymous() {
        let repo = test_repository().await;
        assert!(repo.get_session_identity("nope").await.unwrap().is_none());
    }
}
