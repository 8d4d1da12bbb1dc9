use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
};

use crate::AppState;
use crate::identity::MaybeIdentity;
use crate::ws;

/// Beam relay endpoint - one persistent connection per device.
/// Beam-key auth happens in-band after the upgrade, so the upgrade
/// itself never rejects; an unknown beam simply fails the handshake.
pub async fn beam_websocket_handler(
    State(state): State<AppState>,
    Path(beam_id): Path<String>,
    maybe_identity: MaybeIdentity,
    ws: WebSocketUpgrade,
) -> Response {
    let relay_state = state.relay_state.clone();
    let repository = state.repository.clone();
    let relay_config = state.relay_config.clone();

    ws.on_upgrade(move |socket| {
        ws::handle_beam_ws(
            socket,
            beam_id,
            maybe_identity.0,
            relay_state,
            repository,
            relay_config,
        )
    })
}
