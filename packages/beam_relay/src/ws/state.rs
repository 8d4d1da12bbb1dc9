//! Relay State
//!
//! Process-wide shared state for the hub: per-beam group membership
//! (fan-out targets) and per-beam presence rosters. This is the only
//! state shared across every connection's task.
//!
//! Lock order is presence → groups; no path acquires them the other
//! way around. Delivery into member queues uses `try_send`, so no lock
//! is ever held across actual I/O.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use crate::metrics::RelayMetrics;

use super::protocol::{BeamMember, Outbound, ServerMessage};

/// Fan-out targets for one beam: connection id → outbound queue.
type Group = HashMap<String, mpsc::Sender<Outbound>>;

pub struct RelayState {
    /// Group membership: beam_id → joined connections.
    groups: RwLock<HashMap<String, Group>>,
    /// Presence rosters: beam_id → authenticated members, insertion
    /// order preserved (this is the order clients see).
    presence: RwLock<HashMap<String, Vec<BeamMember>>>,
    pub(crate) metrics: Arc<RelayMetrics>,
}

impl RelayState {
    pub fn new(metrics: Arc<RelayMetrics>) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            presence: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    // =========================================================================
    // Group fan-out
    // =========================================================================

    /// Register a connection's outbound queue with a beam's group.
    pub async fn join(&self, beam_id: &str, connection_id: &str, tx: mpsc::Sender<Outbound>) {
        let mut groups = self.groups.write().await;
        groups
            .entry(beam_id.to_string())
            .or_default()
            .insert(connection_id.to_string(), tx);
    }

    /// Remove a connection from a beam's group. Empty groups are evicted.
    pub async fn leave(&self, beam_id: &str, connection_id: &str) {
        let mut groups = self.groups.write().await;
        if let Some(group) = groups.get_mut(beam_id) {
            group.remove(connection_id);
            if group.is_empty() {
                groups.remove(beam_id);
            }
        }
    }

    /// Deliver an event to every connection currently joined to the
    /// beam, including the publisher. Best-effort: a member whose queue
    /// is full or whose outbound path died is skipped without failing
    /// the publish for the rest.
    pub async fn publish(&self, beam_id: &str, event: Outbound) {
        let groups = self.groups.read().await;
        self.deliver(groups.get(beam_id), beam_id, event);
    }

    fn deliver(&self, group: Option<&Group>, beam_id: &str, event: Outbound) {
        let Some(group) = group else { return };
        for (connection_id, tx) in group {
            match tx.try_send(event.clone()) {
                Ok(()) => self.metrics.broadcast_delivered(),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(beam = %beam_id, conn = %connection_id, "Outbound queue full, dropping broadcast");
                    self.metrics.broadcast_dropped();
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(beam = %beam_id, conn = %connection_id, "Outbound path gone, dropping broadcast");
                    self.metrics.broadcast_dropped();
                }
            }
        }
    }

    // =========================================================================
    // Presence tracking
    // =========================================================================
    //
    // Mutations hold the presence write lock across the `authed_users`
    // publish, so all members observe presence updates for a beam in
    // the same relative order as the add/remove events that produced
    // them.

    /// Record an authenticated member and broadcast the updated roster.
    /// Idempotent on client_id: a duplicate replaces in place and keeps
    /// its original position.
    pub async fn add_member(&self, beam_id: &str, member: BeamMember) {
        let mut presence = self.presence.write().await;
        let roster = presence.entry(beam_id.to_string()).or_default();
        if let Some(slot) = roster
            .iter_mut()
            .find(|m| m.client_id == member.client_id)
        {
            *slot = member;
        } else {
            roster.push(member);
        }
        let users = roster.clone();
        self.broadcast_roster(beam_id, users).await;
    }

    /// Drop a member from the roster and broadcast the updated roster.
    /// A client_id that was never present is a no-op (no broadcast) —
    /// a connection that failed auth has nothing to clean up. Empty
    /// rosters are evicted so dead beams don't accumulate.
    pub async fn remove_member(&self, beam_id: &str, client_id: &str) {
        let mut presence = self.presence.write().await;
        let Some(roster) = presence.get_mut(beam_id) else {
            return;
        };
        let before = roster.len();
        roster.retain(|m| m.client_id != client_id);
        if roster.len() == before {
            return;
        }
        let users = roster.clone();
        if roster.is_empty() {
            presence.remove(beam_id);
        }
        self.broadcast_roster(beam_id, users).await;
    }

    /// Point-in-time roster for a beam, in join order.
    pub async fn presence_snapshot(&self, beam_id: &str) -> Vec<BeamMember> {
        self.presence
            .read()
            .await
            .get(beam_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn broadcast_roster(&self, beam_id: &str, users: Vec<BeamMember>) {
        let groups = self.groups.read().await;
        self.deliver(
            groups.get(beam_id),
            beam_id,
            Outbound::Direct(ServerMessage::AuthedUsers { users }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RelayState {
        RelayState::new(Arc::new(RelayMetrics::new()))
    }

    fn member(id: &str, nick: &str) -> BeamMember {
        BeamMember {
            client_id: id.to_string(),
            nickname: nick.to_string(),
        }
    }

    fn roster(event: Outbound) -> Vec<BeamMember> {
        match event {
            Outbound::Direct(ServerMessage::AuthedUsers { users }) => users,
            other => panic!("expected authed_users, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_reaches_all_members_including_publisher() {
        let state = state();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        state.join("beam", "conn-a", tx_a).await;
        state.join("beam", "conn-b", tx_b).await;

        state
            .publish(
                "beam",
                Outbound::Direct(ServerMessage::Message {
                    message: serde_json::json!("hi"),
                }),
            )
            .await;

        // self-echo: the publisher's own queue receives the event too
        assert!(matches!(
            rx_a.try_recv().unwrap(),
            Outbound::Direct(ServerMessage::Message { .. })
        ));
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            Outbound::Direct(ServerMessage::Message { .. })
        ));
    }

    #[tokio::test]
    async fn groups_never_span_beams() {
        let state = state();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        state.join("beam-1", "conn-a", tx_a).await;
        state.join("beam-2", "conn-b", tx_b).await;

        state
            .publish(
                "beam-1",
                Outbound::Direct(ServerMessage::Message {
                    message: serde_json::json!("only one"),
                }),
            )
            .await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_only_that_member() {
        let state = state();
        let (tx_full, mut rx_full) = mpsc::channel(1);
        let (tx_ok, mut rx_ok) = mpsc::channel(8);
        state.join("beam", "conn-full", tx_full).await;
        state.join("beam", "conn-ok", tx_ok).await;

        let msg = || {
            Outbound::Direct(ServerMessage::Message {
                message: serde_json::json!("x"),
            })
        };
        state.publish("beam", msg()).await;
        state.publish("beam", msg()).await;

        // capacity-1 queue took one event, the second was dropped for it
        assert!(rx_full.try_recv().is_ok());
        assert!(rx_full.try_recv().is_err());
        // the healthy member saw both
        assert!(rx_ok.try_recv().is_ok());
        assert!(rx_ok.try_recv().is_ok());
    }

    #[tokio::test]
    async fn leave_stops_delivery() {
        let state = state();
        let (tx, mut rx) = mpsc::channel(8);
        state.join("beam", "conn-a", tx).await;
        state.leave("beam", "conn-a").await;

        state
            .publish(
                "beam",
                Outbound::Direct(ServerMessage::Message {
                    message: serde_json::json!("x"),
                }),
            )
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn add_member_is_idempotent_and_order_preserving() {
        let state = state();
        state.add_member("beam", member("a", "Falcon")).await;
        state.add_member("beam", member("b", "Otter")).await;
        // duplicate client_id replaces in place
        state.add_member("beam", member("a", "Lynx")).await;

        let snapshot = state.presence_snapshot("beam").await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0], member("a", "Lynx"));
        assert_eq!(snapshot[1], member("b", "Otter"));
    }

    #[tokio::test]
    async fn remove_member_evicts_empty_beams() {
        let state = state();
        state.add_member("beam", member("a", "Falcon")).await;
        state.remove_member("beam", "a").await;

        assert!(state.presence_snapshot("beam").await.is_empty());
        assert!(state.presence.read().await.is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_member_is_a_noop() {
        let state = state();
        let (tx, mut rx) = mpsc::channel(8);
        state.join("beam", "conn-a", tx).await;

        state.remove_member("beam", "ghost").await;
        state.remove_member("other-beam", "ghost").await;

        // no roster broadcast was produced
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn presence_churn_broadcasts_in_order() {
        let state = state();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        // A joins and authenticates
        state.join("beam", "conn-a", tx_a).await;
        state.add_member("beam", member("a", "Falcon")).await;
        // B joins and authenticates
        state.join("beam", "conn-b", tx_b).await;
        state.add_member("beam", member("b", "Otter")).await;
        // A disconnects: presence removal precedes group leave
        state.remove_member("beam", "a").await;
        state.leave("beam", "conn-a").await;

        // A observed its own join, then B's join
        assert_eq!(roster(rx_a.try_recv().unwrap()), vec![member("a", "Falcon")]);
        assert_eq!(
            roster(rx_a.try_recv().unwrap()),
            vec![member("a", "Falcon"), member("b", "Otter")]
        );

        // B observed its own join, then A's departure leaving only B
        assert_eq!(
            roster(rx_b.try_recv().unwrap()),
            vec![member("a", "Falcon"), member("b", "Otter")]
        );
        assert_eq!(roster(rx_b.try_recv().unwrap()), vec![member("b", "Otter")]);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn snapshot_tracks_interleaved_churn() {
        let state = state();
        state.add_member("beam", member("a", "Falcon")).await;
        state.add_member("beam", member("b", "Otter")).await;
        state.add_member("beam", member("c", "Lynx")).await;
        state.remove_member("beam", "b").await;
        state.add_member("beam", member("d", "Heron")).await;
        state.remove_member("beam", "a").await;

        let snapshot = state.presence_snapshot("beam").await;
        assert_eq!(snapshot, vec![member("c", "Lynx"), member("d", "Heron")]);
    }
}
