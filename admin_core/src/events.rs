//! Audit events for admin mutations.
//!
//! Every successful mutation produces one [`AuditEntry`], dispatched to the
//! configured [`AuditSink`] after the transaction commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::policy::Principal;

/// What happened to which records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuditEvent {
    RecordCreated {
        model: String,
        id: i64,
    },
    RecordUpdated {
        model: String,
        id: i64,
        changed: Vec<String>,
    },
    RecordDeleted {
        model: String,
        id: i64,
        soft: bool,
    },
    ActionPerformed {
        model: String,
        action: String,
        ids: Vec<i64>,
    },
}

impl AuditEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RecordCreated { .. } => "record_created",
            Self::RecordUpdated { .. } => "record_updated",
            Self::RecordDeleted { .. } => "record_deleted",
            Self::ActionPerformed { .. } => "action_performed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub user_id: Option<i64>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn new(principal: &Principal, event: AuditEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            user_id: principal.user_id,
            event,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn dispatch(&self, entry: AuditEntry);
}

/// Logs entries under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn dispatch(&self, entry: AuditEntry) {
        let payload = serde_json::to_string(&entry.event).unwrap_or_default();
        tracing::info!(
            target: "audit",
            event_id = %entry.event_id,
            event = entry.event.name(),
            user_id = ?entry.user_id,
            payload = %payload,
            "Audit event"
        );
    }
}

/// Forwards entries to an in-process consumer.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::UnboundedSender<AuditEntry>,
}

impl ChannelAuditSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AuditEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn dispatch(&self, entry: AuditEntry) {
        if self.tx.send(entry).is_err() {
            tracing::warn!("Audit channel closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let entry = AuditEntry::new(
            &Principal::user(7, &["admin"]),
            AuditEvent::RecordUpdated {
                model: "products".into(),
                id: 3,
                changed: vec!["price".into()],
            },
        );
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "RecordUpdated");
        assert_eq!(value["model"], "products");
        assert_eq!(value["changed"], serde_json::json!(["price"]));
        assert_eq!(value["user_id"], 7);
    }

    #[tokio::test]
    async fn channel_sink_forwards_entries() {
        let (sink, mut rx) = ChannelAuditSink::new();
        sink.dispatch(AuditEntry::new(
            &Principal::anonymous(),
            AuditEvent::RecordDeleted {
                model: "tags".into(),
                id: 1,
                soft: false,
            },
        ));
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.event.name(), "record_deleted");
        assert_eq!(entry.user_id, None);

        drop(rx);
        sink.dispatch(AuditEntry::new(
            &Principal::anonymous(),
            AuditEvent::RecordCreated {
                model: "tags".into(),
                id: 2,
            },
        ));
    }
}
