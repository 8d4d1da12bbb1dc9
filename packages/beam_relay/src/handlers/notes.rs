use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;

use crate::AppState;
use crate::identity::MaybeIdentity;

/// Captured clipboard history for a beam, oldest first. Requires an
/// application identity; the beam key alone grants relay access, not
/// history reads.
pub async fn get_beam_notes(
    State(state): State<AppState>,
    Path(beam_id): Path<String>,
    identity: MaybeIdentity,
) -> Result<impl IntoResponse, StatusCode> {
    if identity.0.is_none() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    match state.repository.list_beam_notes(&beam_id).await {
        Ok(notes) => Ok(Json(notes)),
        Err(e) => {
            error!(beam = %beam_id, "Failed to list beam notes: {e:#}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
