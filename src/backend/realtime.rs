//! Realtime channel types
//!
//! Row change events delivered on a table channel, and the subscription handle
//! that receives them. Dropping the handle unsubscribes.

use serde_json::Value;
use tokio::sync::mpsc;

/// What a channel listens to.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    pub table: String,
    /// Optional `column = value` restriction
    pub filter: Option<(String, Value)>,
}

impl ChannelSpec {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
        }
    }

    pub fn filter_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some((column.into(), value.into()));
        self
    }

    /// Topic name, e.g. `messages:conversation_id=eq.c1`.
    pub fn topic(&self) -> String {
        match &self.filter {
            Some((column, value)) => {
                let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                format!("{}:{}=eq.{}", self.table, column, value)
            }
            None => self.table.clone(),
        }
    }

    /// Whether a changed row belongs to this channel.
    pub fn matches(&self, table: &str, row: &Value) -> bool {
        if table != self.table {
            return false;
        }
        match &self.filter {
            Some((column, value)) => row.get(column) == Some(value),
            None => true,
        }
    }
}

/// A row change pushed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Insert { table: String, record: Value },
    Update { table: String, record: Value, old: Value },
    Delete { table: String, old: Value },
}

impl RealtimeEvent {
    pub fn table(&self) -> &str {
        match self {
            RealtimeEvent::Insert { table, .. }
            | RealtimeEvent::Update { table, .. }
            | RealtimeEvent::Delete { table, .. } => table,
        }
    }

    /// The row the event is about: the new record, or the old one on delete.
    pub fn row(&self) -> &Value {
        match self {
            RealtimeEvent::Insert { record, .. } | RealtimeEvent::Update { record, .. } => record,
            RealtimeEvent::Delete { old, .. } => old,
        }
    }
}

/// Receiving end of a channel subscription.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    receiver: mpsc::UnboundedReceiver<RealtimeEvent>,
}

impl Subscription {
    pub fn new(topic: String, receiver: mpsc::UnboundedReceiver<RealtimeEvent>) -> Self {
        Self { topic, receiver }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next event; `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        self.receiver.recv().await
    }

    /// Stops delivery. Equivalent to dropping the subscription.
    pub fn unsubscribe(mut self) {
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_names() {
        assert_eq!(ChannelSpec::table("messages").topic(), "messages");
        assert_eq!(
            ChannelSpec::table("messages").filter_eq("conversation_id", "c1").topic(),
            "messages:conversation_id=eq.c1"
        );
    }

    #[test]
    fn test_channel_matching() {
        let spec = ChannelSpec::table("messages").filter_eq("conversation_id", "c1");

        assert!(spec.matches("messages", &json!({"conversation_id": "c1"})));
        assert!(!spec.matches("messages", &json!({"conversation_id": "c2"})));
        assert!(!spec.matches("notifications", &json!({"conversation_id": "c1"})));
    }

    #[test]
    fn test_event_row_accessor() {
        let event = RealtimeEvent::Delete {
            table: "messages".into(),
            old: json!({"id": "m1"}),
        };
        assert_eq!(event.table(), "messages");
        assert_eq!(event.row()["id"], "m1");
    }
}
