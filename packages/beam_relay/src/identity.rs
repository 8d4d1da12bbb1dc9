//! Application identity: the authenticated principal used for
//! persistence attribution, distinct from beam-key relay auth.
//!
//! A connection can hold a beam key without an identity (relay works,
//! clipboard persistence is skipped) and vice versa.

use axum::http::{StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::AppState;

/// The application-level principal behind a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

/// Optional identity extractor: resolves the `beam_session` cookie or
/// an `Authorization: Bearer` token against the session store.
/// Absent, invalid, or expired tokens yield an anonymous connection —
/// never a rejection; beam-key auth is a separate layer.
#[derive(Debug, Clone)]
pub struct MaybeIdentity(pub Option<Identity>);

const SESSION_COOKIE: &str = "beam_session";

fn bearer_token(parts: &axum::http::request::Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn cookie_token(parts: &axum::http::request::Parts) -> Option<String> {
    let cookies = parts.headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        pair.trim()
            .strip_prefix(SESSION_COOKIE)?
            .strip_prefix('=')
            .map(str::to_string)
    })
}

impl axum::extract::FromRequestParts<AppState> for MaybeIdentity {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(parts).or_else(|| cookie_token(parts)) else {
            return Ok(MaybeIdentity(None));
        };

        // Off-path lookup with its own bound; a slow or failing session
        // store degrades to anonymous instead of stalling the upgrade.
        let lookup = tokio::time::timeout(
            state.relay_config.auth_timeout,
            state.repository.get_session_identity(&token),
        )
        .await;

        match lookup {
            Ok(Ok(identity)) => Ok(MaybeIdentity(identity)),
            Ok(Err(e)) => {
                warn!("Session lookup failed: {e:#}");
                Ok(MaybeIdentity(None))
            }
            Err(_) => {
                warn!("Session lookup timed out");
                Ok(MaybeIdentity(None))
            }
        }
    }
}
