//! Activity events emitted after successful commits.
//!
//! Delivery is fire-and-forget: a sink failure never affects the mutation
//! that produced the event.

use std::fmt;

use folio_types::{PrincipalId, WorkspaceId, now_millis};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use tokio::sync::broadcast;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActivityAction {
    DocumentCreated,
    BlockCreated,
    BlockUpdated,
    BlockMoved,
    BlockDeleted,
    BlockRestored,
    BatchApplied,
    RevisionCommitted,
    DocumentReverted,
    SnapshotCreated,
    DocumentPublished,
    StatusChanged,
    TagsChanged,
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Document,
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub workspace_id: WorkspaceId,
    pub action: ActivityAction,
    pub entity_type: EntityType,
    /// Prefixed id of the entity (`doc_…` / `blk_…`).
    pub entity_id: String,
    pub actor_id: PrincipalId,
    pub at_ms: u64,
    pub details: serde_json::Value,
}

impl ActivityEvent {
    pub fn new(
        workspace_id: WorkspaceId,
        action: ActivityAction,
        entity_type: EntityType,
        entity_id: String,
        actor_id: PrincipalId,
        details: serde_json::Value,
    ) -> Self {
        Self {
            workspace_id,
            action,
            entity_type,
            entity_id,
            actor_id,
            at_ms: now_millis(),
            details,
        }
    }
}

/// Receiver of activity events.
pub trait ActivitySink: Send + Sync {
    fn record(&self, event: ActivityEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ActivitySink for NullSink {
    fn record(&self, _event: ActivityEvent) {}
}

/// Fans events out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ActivityEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl ActivitySink for BroadcastSink {
    fn record(&self, event: ActivityEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(action: ActivityAction) -> ActivityEvent {
        ActivityEvent::new(
            WorkspaceId::new(),
            action,
            EntityType::Document,
            "doc_x".into(),
            PrincipalId::system(),
            json!({}),
        )
    }

    #[test]
    fn test_broadcast_delivers_to_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        sink.record(event(ActivityAction::BlockCreated));
        let got = rx.try_recv().unwrap();
        assert_eq!(got.action, ActivityAction::BlockCreated);
    }

    #[test]
    fn test_send_without_subscribers_is_silent() {
        let sink = BroadcastSink::default();
        sink.record(event(ActivityAction::DocumentCreated));
        NullSink.record(event(ActivityAction::DocumentCreated));
    }

    #[test]
    fn test_action_strings() {
        assert_eq!(ActivityAction::RevisionCommitted.to_string(), "revision_committed");
        let parsed: ActivityAction = "block_moved".parse().unwrap();
        assert_eq!(parsed, ActivityAction::BlockMoved);
    }
}
