//! Per-connection message dispatch.
//!
//! Classifies an inbound envelope by type and invokes the matching
//! handler. The table is explicit: auth handshake, chat message,
//! clipboard share, beam claim, and a default arm that forwards any
//! unrecognized type verbatim so forward-compatible event types flow
//! through without a code change here.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::AuthValidator;
use crate::identity::Identity;
use crate::repository::RelayRepository;

use super::names::{pick_nickname, random_client_id};
use super::protocol::{BeamMember, Envelope, Outbound, ServerMessage};
use super::state::RelayState;

/// Per-connection context the dispatcher operates on. Owned by the
/// connection's input loop; `member` flips from None to Some on a
/// successful handshake and never back.
pub(crate) struct ConnectionContext {
    pub connection_id: String,
    pub beam_id: String,
    /// Application identity resolved at upgrade time; None for
    /// anonymous connections.
    pub identity: Option<Identity>,
    /// Relay-level identity, assigned on successful auth.
    pub member: Option<BeamMember>,
    pub tx: mpsc::Sender<Outbound>,
    pub state: Arc<RelayState>,
    pub validator: AuthValidator,
    pub repository: Arc<RelayRepository>,
}

/// Result of dispatching one envelope.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DispatchResult {
    /// Keep reading from the connection.
    Handled,
    /// The handler is done with this connection; close the socket.
    Close,
}

pub(crate) async fn dispatch(ctx: &mut ConnectionContext, envelope: Envelope) -> DispatchResult {
    match envelope.kind.as_str() {
        "auth" => handle_auth(ctx, envelope.message).await,
        "message" => {
            // Deliberate pass-through: no auth precondition here. An
            // unauthenticated sender has not joined the group, so it
            // gets no echo back.
            ctx.state
                .publish(
                    &ctx.beam_id,
                    Outbound::Direct(ServerMessage::Message {
                        message: envelope.message,
                    }),
                )
                .await;
            DispatchResult::Handled
        }
        "share_clipboard" => {
            let extra = envelope.extra.unwrap_or(Value::Null);
            ctx.state
                .publish(
                    &ctx.beam_id,
                    Outbound::Clipboard {
                        message: envelope.message,
                        extra,
                        origin: ctx.connection_id.clone(),
                    },
                )
                .await;
            DispatchResult::Handled
        }
        "save_beam" => handle_save_beam(ctx, envelope).await,
        _ => {
            // Explicit default rule: forward unknown types verbatim.
            ctx.state
                .publish(&ctx.beam_id, Outbound::Forward(envelope))
                .await;
            DispatchResult::Handled
        }
    }
}

async fn handle_auth(ctx: &mut ConnectionContext, credential: Value) -> DispatchResult {
    if ctx.member.is_some() {
        debug!(conn = %ctx.connection_id, "Ignoring repeated auth on authenticated connection");
        return DispatchResult::Handled;
    }

    let credential = credential.as_str().unwrap_or_default();
    if !ctx.validator.validate(&ctx.beam_id, credential).await {
        ctx.state.metrics.auth_failed();
        let _ = ctx
            .tx
            .send(Outbound::Direct(ServerMessage::AuthFailed {
                message: "invalid beam credentials".to_string(),
            }))
            .await;
        return DispatchResult::Close;
    }

    let member = BeamMember {
        client_id: random_client_id(),
        nickname: pick_nickname().to_string(),
    };

    // Join before the presence broadcast so this connection observes
    // its own roster update; auth_success is queued first so the
    // client sees it before any authed_users.
    ctx.state
        .join(&ctx.beam_id, &ctx.connection_id, ctx.tx.clone())
        .await;
    let _ = ctx
        .tx
        .send(Outbound::Direct(ServerMessage::AuthSuccess {
            message: member.clone(),
        }))
        .await;
    ctx.state.add_member(&ctx.beam_id, member.clone()).await;

    info!(
        beam = %ctx.beam_id,
        conn = %ctx.connection_id,
        client_id = %member.client_id,
        nickname = %member.nickname,
        "Connection authenticated"
    );
    ctx.member = Some(member);
    DispatchResult::Handled
}

/// An identity-bearing member claims an anonymous beam. The envelope
/// still fans out so other members observe the claim.
async fn handle_save_beam(ctx: &mut ConnectionContext, envelope: Envelope) -> DispatchResult {
    if let (Some(identity), Some(_)) = (&ctx.identity, &ctx.member) {
        let beam_name = envelope
            .message
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let repository = ctx.repository.clone();
        let beam_id = ctx.beam_id.clone();
        let user_id = identity.user_id.clone();
        tokio::spawn(async move {
            match repository
                .attach_owner(&beam_id, &user_id, beam_name.as_deref())
                .await
            {
                Ok(true) => info!(beam = %beam_id, user = %user_id, "Beam claimed"),
                Ok(false) => debug!(beam = %beam_id, "Beam already owned, claim ignored"),
                Err(e) => warn!(beam = %beam_id, "Failed to claim beam: {e:#}"),
            }
        });
    }

    ctx.state
        .publish(&ctx.beam_id, Outbound::Forward(envelope))
        .await;
    DispatchResult::Handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RelayMetrics;
    use crate::repository::test_helpers::test_repository;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::Receiver;

    const BEAM: &str = "beam-1";
    const KEY: &str = "sekrit";

    async fn test_state_and_repo() -> (Arc<RelayState>, Arc<RelayRepository>) {
        let repo = Arc::new(test_repository().await);
        repo.create_beam(BEAM, KEY, None).await.unwrap();
        let state = Arc::new(RelayState::new(Arc::new(RelayMetrics::new())));
        (state, repo)
    }

    fn context(
        conn: &str,
        state: Arc<RelayState>,
        repo: Arc<RelayRepository>,
        require_key: bool,
        identity: Option<Identity>,
    ) -> (ConnectionContext, Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(16);
        let validator = AuthValidator::new(repo.clone(), require_key, Duration::from_secs(2));
        (
            ConnectionContext {
                connection_id: conn.to_string(),
                beam_id: BEAM.to_string(),
                identity,
                member: None,
                tx,
                state,
                validator,
                repository: repo,
            },
            rx,
        )
    }

    fn envelope(kind: &str, message: Value) -> Envelope {
        Envelope {
            kind: kind.to_string(),
            message,
            extra: None,
        }
    }

    async fn authenticate(ctx: &mut ConnectionContext, rx: &mut Receiver<Outbound>) -> BeamMember {
        let result = dispatch(ctx, envelope("auth", json!(KEY))).await;
        assert_eq!(result, DispatchResult::Handled);
        let Some(Outbound::Direct(ServerMessage::AuthSuccess { message })) = rx.recv().await else {
            panic!("expected auth_success first");
        };
        // consume the roster broadcast that follows
        let Some(Outbound::Direct(ServerMessage::AuthedUsers { .. })) = rx.recv().await else {
            panic!("expected authed_users after auth_success");
        };
        message
    }

    #[tokio::test]
    async fn successful_auth_assigns_member_and_broadcasts_presence() {
        let (state, repo) = test_state_and_repo().await;
        let (mut ctx, mut rx) = context("conn-a", state.clone(), repo, true, None);

        let member = authenticate(&mut ctx, &mut rx).await;
        assert_eq!(ctx.member.as_ref().unwrap().client_id, member.client_id);

        let snapshot = state.presence_snapshot(BEAM).await;
        assert_eq!(snapshot, vec![member]);
    }

    #[tokio::test]
    async fn failed_auth_sends_auth_failed_and_closes() {
        let (state, repo) = test_state_and_repo().await;
        let (mut ctx, mut rx) = context("conn-a", state.clone(), repo, true, None);

        let result = dispatch(&mut ctx, envelope("auth", json!("wrong"))).await;
        assert_eq!(result, DispatchResult::Close);
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Direct(ServerMessage::AuthFailed { .. }))
        ));
        assert!(ctx.member.is_none());
        // no presence entry was created
        assert!(state.presence_snapshot(BEAM).await.is_empty());
    }

    #[tokio::test]
    async fn missing_beam_reads_as_auth_failure() {
        let (state, repo) = test_state_and_repo().await;
        let (mut ctx, mut rx) = context("conn-a", state, repo, true, None);
        ctx.beam_id = "ghost".to_string();

        let result = dispatch(&mut ctx, envelope("auth", json!(KEY))).await;
        assert_eq!(result, DispatchResult::Close);
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Direct(ServerMessage::AuthFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn open_mode_admits_any_credential() {
        let (state, repo) = test_state_and_repo().await;
        let (mut ctx, mut rx) = context("conn-a", state, repo, false, None);

        let result = dispatch(&mut ctx, envelope("auth", json!("anything"))).await;
        assert_eq!(result, DispatchResult::Handled);
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Direct(ServerMessage::AuthSuccess { .. }))
        ));
    }

    #[tokio::test]
    async fn non_string_credential_fails_cleanly() {
        let (state, repo) = test_state_and_repo().await;
        let (mut ctx, _rx) = context("conn-a", state, repo, true, None);

        let result = dispatch(&mut ctx, envelope("auth", json!({"nested": true}))).await;
        assert_eq!(result, DispatchResult::Close);
    }

    #[tokio::test]
    async fn message_echoes_back_to_sender() {
        let (state, repo) = test_state_and_repo().await;
        let (mut ctx, mut rx) = context("conn-a", state, repo, true, None);
        authenticate(&mut ctx, &mut rx).await;

        dispatch(&mut ctx, envelope("message", json!("hello"))).await;
        let Some(Outbound::Direct(ServerMessage::Message { message })) = rx.recv().await else {
            panic!("expected message echo");
        };
        assert_eq!(message, json!("hello"));
    }

    #[tokio::test]
    async fn pre_auth_message_reaches_members_but_not_sender() {
        let (state, repo) = test_state_and_repo().await;
        let (mut authed, mut rx_authed) =
            context("conn-a", state.clone(), repo.clone(), true, None);
        authenticate(&mut authed, &mut rx_authed).await;

        let (mut anon, mut rx_anon) = context("conn-b", state, repo, true, None);
        dispatch(&mut anon, envelope("message", json!("drive-by"))).await;

        assert!(matches!(
            rx_authed.try_recv(),
            Ok(Outbound::Direct(ServerMessage::Message { .. }))
        ));
        // the unauthenticated sender never joined, so no echo
        assert!(rx_anon.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_type_is_forwarded_verbatim_to_all() {
        let (state, repo) = test_state_and_repo().await;
        let (mut a, mut rx_a) = context("conn-a", state.clone(), repo.clone(), true, None);
        let (mut b, mut rx_b) = context("conn-b", state, repo, true, None);
        authenticate(&mut a, &mut rx_a).await;
        authenticate(&mut b, &mut rx_b).await;
        // drain A's copy of B's roster broadcast
        let _ = rx_a.try_recv();

        dispatch(&mut a, envelope("ping", json!("x"))).await;

        for rx in [&mut rx_a, &mut rx_b] {
            let Some(Outbound::Forward(env)) = rx.recv().await else {
                panic!("expected forwarded envelope");
            };
            assert_eq!(
                serde_json::to_value(&env).unwrap(),
                json!({"type": "ping", "message": "x", "extra": null})
            );
        }
    }

    #[tokio::test]
    async fn share_clipboard_publishes_origin_tagged_event() {
        let (state, repo) = test_state_and_repo().await;
        let (mut a, mut rx_a) = context("conn-a", state.clone(), repo.clone(), true, None);
        let (mut b, mut rx_b) = context("conn-b", state, repo, true, None);
        authenticate(&mut a, &mut rx_a).await;
        authenticate(&mut b, &mut rx_b).await;
        let _ = rx_a.try_recv();

        let mut env = envelope("share_clipboard", json!("copied text"));
        env.extra = Some(json!("text"));
        dispatch(&mut a, env).await;

        for rx in [&mut rx_a, &mut rx_b] {
            let Some(Outbound::Clipboard {
                message,
                extra,
                origin,
            }) = rx.recv().await
            else {
                panic!("expected clipboard event");
            };
            assert_eq!(message, json!("copied text"));
            assert_eq!(extra, json!("text"));
            assert_eq!(origin, "conn-a");
        }
    }

    #[tokio::test]
    async fn save_beam_claims_for_identity_and_forwards() {
        let (state, repo) = test_state_and_repo().await;
        repo.create_user("u1", "alice", "Alice").await.unwrap();
        let identity = Identity {
            user_id: "u1".to_string(),
            display_name: "Alice".to_string(),
        };
        let (mut ctx, mut rx) = context("conn-a", state, repo.clone(), true, Some(identity));
        authenticate(&mut ctx, &mut rx).await;

        dispatch(&mut ctx, envelope("save_beam", json!("My beam"))).await;
        assert!(matches!(rx.recv().await, Some(Outbound::Forward(_))));

        // the spawned claim lands shortly after
        let mut claimed = false;
        for _ in 0..50 {
            let beam = repo.get_beam(BEAM).await.unwrap().unwrap();
            if beam.owner_user_id.as_deref() == Some("u1") {
                assert_eq!(beam.beam_name.as_deref(), Some("My beam"));
                claimed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(claimed, "beam claim never landed");
    }

    #[tokio::test]
    async fn save_beam_without_identity_only_forwards() {
        let (state, repo) = test_state_and_repo().await;
        let (mut ctx, mut rx) = context("conn-a", state, repo.clone(), true, None);
        authenticate(&mut ctx, &mut rx).await;

        dispatch(&mut ctx, envelope("save_beam", json!("My beam"))).await;
        assert!(matches!(rx.recv().await, Some(Outbound::Forward(_))));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let beam = repo.get_beam(BEAM).await.unwrap().unwrap();
        assert!(beam.owner_user_id.is_none());
    }

    #[tokio::test]
    async fn repeated_auth_is_ignored() {
        let (state, repo) = test_state_and_repo().await;
        let (mut ctx, mut rx) = context("conn-a", state.clone(), repo, true, None);
        let member = authenticate(&mut ctx, &mut rx).await;

        let result = dispatch(&mut ctx, envelope("auth", json!(KEY))).await;
        assert_eq!(result, DispatchResult::Handled);
        // identity unchanged, no duplicate presence entry
        assert_eq!(ctx.member.as_ref().unwrap(), &member);
        assert_eq!(state.presence_snapshot(BEAM).await.len(), 1);
    }
}
