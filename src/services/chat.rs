//! Conversation messages with live updates
//!
//! Loaded history and realtime inserts feed the same list, which stays
//! de-duplicated by id and ordered by `created_at`.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{ChannelSpec, Database, Order, Query, Realtime, RealtimeEvent};
use crate::error::{ServiceError, ServiceResult};
use crate::services::{codec, BaseService, StateChannel, ViewState};

const TABLE: &str = "messages";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(with = "codec::timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Adds or replaces `message` by id and keeps the list in timestamp order.
pub fn merge_message(messages: &mut Vec<ChatMessage>, message: ChatMessage) {
    match messages.iter_mut().find(|existing| existing.id == message.id) {
        Some(existing) => *existing = message,
        None => messages.push(message),
    }
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
}

pub struct ChatService {
    base: BaseService,
    messages: StateChannel<Vec<ChatMessage>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ChatService {
    pub fn new(base: BaseService) -> Self {
        Self {
            base,
            messages: StateChannel::new(),
            listener: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &StateChannel<Vec<ChatMessage>> {
        &self.messages
    }

    pub fn snapshot(&self) -> ViewState<Vec<ChatMessage>> {
        self.messages.snapshot()
    }

    pub async fn load_messages(&self, conversation_id: &str) -> ServiceResult<Vec<ChatMessage>> {
        self.messages.start_loading();
        let query = Query::table(TABLE)
            .eq("conversation_id", conversation_id)
            .order("created_at", Order::Asc);
        let result = self.base.fetch_rows(&query).await;
        if let Ok(messages) = &result {
            self.messages.finish(messages.clone());
        }
        self.messages.settle(result)
    }

    pub async fn send(&self, conversation_id: &str, content: &str) -> ServiceResult<ChatMessage> {
        let content = content.trim();
        if content.is_empty() {
            return self
                .messages
                .settle(Err(ServiceError::InvalidData("Message is empty".to_string())));
        }

        let result: ServiceResult<ChatMessage> = async {
            let sender_id = self.base.current_user_id().await?;
            let row = json!({
                "conversation_id": conversation_id,
                "sender_id": sender_id,
                "content": content,
            });
            let stored = self
                .base
                .backend()
                .insert(TABLE, row)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| ServiceError::Unknown("Insert returned no row".to_string()))?;
            codec::decode_row::<ChatMessage>(stored)
        }
        .await;

        if let Ok(message) = &result {
            let message = message.clone();
            self.messages.modify(|messages| merge_message(messages, message));
        }
        self.messages.settle(result)
    }

    /// Starts following new messages of a conversation, replacing any
    /// previous subscription. Messages of other conversations are dropped
    /// from the published list.
    pub async fn subscribe(&self, conversation_id: &str) -> ServiceResult<()> {
        self.unsubscribe().await;
        self.messages
            .modify(|messages| messages.retain(|message| message.conversation_id == conversation_id));

        let channel = ChannelSpec::table(TABLE).filter_eq("conversation_id", conversation_id);
        let subscription = self.base.backend().subscribe(channel).await;
        let mut subscription = self.messages.settle(subscription.map_err(ServiceError::from))?;
        info!(topic = %subscription.topic(), "Chat subscribed");

        let messages = self.messages.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                apply_event(&messages, event);
            }
            debug!("Chat channel closed");
        });

        let previous = self.lock_listener().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    /// Stops following the conversation. The channel is closed once this
    /// returns.
    pub async fn unsubscribe(&self) {
        let handle = self.lock_listener().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            info!("Chat unsubscribed");
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.lock_listener().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ChatService {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_listener().take() {
            handle.abort();
        }
    }
}

fn apply_event(messages: &StateChannel<Vec<ChatMessage>>, event: RealtimeEvent) {
    match event {
        RealtimeEvent::Insert { record, .. } | RealtimeEvent::Update { record, .. } => {
            match codec::decode_row::<ChatMessage>(record) {
                Ok(message) => messages.modify(|list| merge_message(list, message)),
                Err(e) => warn!(error = %e, "Dropping undecodable chat message"),
            }
        }
        RealtimeEvent::Delete { old, .. } => {
            if let Some(id) = old.get("id").and_then(|id| id.as_str()) {
                messages.modify(|list| list.retain(|message| message.id != id));
            }
        }
    }
}
