use anyhow::{Context, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::BeamRelayConfig;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &BeamRelayConfig) -> Result<Self> {
        info!("Connecting to database: {}", config.db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect(&config.db_url())
            .await
            .with_context(|| format!("Failed to connect to database: {}", config.db_url()))?;

        info!("Running database migrations...");
        self::run_migrations(&pool).await?;

        // Set pragmas for performance
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        info!("Database initialized");

        Ok(Self { pool })
    }

}

/// Current schema version - increment when adding migrations
const SCHEMA_VERSION: i64 = 1;

pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL DEFAULT (unixepoch()),
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    if current_version > SCHEMA_VERSION {
        anyhow::bail!(
            "Database schema version {} is newer than supported version {}. Please upgrade the application.",
            current_version,
            SCHEMA_VERSION
        );
    }

    if current_version == SCHEMA_VERSION {
        info!("Database schema up to date (version {})", current_version);
        return Ok(());
    }

    if current_version < 1 {
        apply_migration(pool, 1, "beams, users, sessions, notes", MIGRATION_V1).await?;
    }

    Ok(())
}

async fn apply_migration(
    pool: &SqlitePool,
    version: i64,
    description: &str,
    statements: &[&str],
) -> Result<()> {
    info!("Applying migration {}: {}", version, description);
    for sql in statements {
        sqlx::query(sql)
            .execute(pool)
            .await
            .with_context(|| format!("Migration {} failed", version))?;
    }
    sqlx::query("INSERT INTO schema_version (version, description) VALUES (?, ?)")
        .bind(version)
        .bind(description)
        .execute(pool)
        .await?;
    Ok(())
}

const MIGRATION_V1: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        user_id      TEXT PRIMARY KEY,
        username     TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        created_at   INTEGER NOT NULL DEFAULT (unixepoch())
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        token      TEXT PRIMARY KEY,
        user_id    TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
        created_at INTEGER NOT NULL DEFAULT (unixepoch()),
        expires_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS beams (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        beam_id       TEXT NOT NULL UNIQUE,
        beam_key      TEXT NOT NULL,
        beam_name     TEXT,
        owner_user_id TEXT REFERENCES users(user_id),
        created_at    INTEGER NOT NULL DEFAULT (unixepoch())
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notes (
        id           TEXT PRIMARY KEY,
        user_id      TEXT NOT NULL REFERENCES users(user_id),
        beam_id      TEXT NOT NULL REFERENCES beams(beam_id),
        title        TEXT,
        content      TEXT,
        json_content TEXT,
        note_type    TEXT NOT NULL,
        created_at   INTEGER NOT NULL,
        updated_at   INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_notes_beam ON notes(beam_id)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON sessions(expires_at)",
];
