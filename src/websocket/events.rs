//! Typed outbound events for the live channel.
//!
//! Every event serializes to a flat JSON object with a `type` field using the
//! `object.action` naming convention plus a `timestamp`, so clients switch on
//! one field and patch local state without a refetch. Delivery happens only
//! after the persisted write succeeded, at most once; users without an open
//! channel catch up on their next read.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Message, Reaction};
use crate::services::view_service::{ConversationView, MessageView, ViewService};
use crate::state::AppState;
use crate::websocket::SessionRegistry;

#[derive(Debug, Clone, Serialize)]
pub enum OutboundEvent {
    /// A new mailbox copy; the payload is the receiving owner's own copy.
    #[serde(rename = "message.new")]
    MessageNew {
        conversation_id: Uuid,
        message: MessageView,
    },

    /// Shared-field diff for every copy of a logical message: edited text
    /// and/or the current reaction list.
    #[serde(rename = "message.updated")]
    MessageUpdated {
        conversation_id: Uuid,
        correlation_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        edited_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reactions: Option<Vec<Reaction>>,
    },

    /// Copy ids for an own-copies delete, correlation ids for a
    /// delete-for-everyone; `for_everyone` says which.
    #[serde(rename = "messages.deleted")]
    MessagesDeleted {
        conversation_id: Uuid,
        ids: Vec<Uuid>,
        for_everyone: bool,
    },

    #[serde(rename = "messages.read")]
    MessagesRead {
        conversation_id: Uuid,
        reader_id: Uuid,
        correlation_ids: Vec<Uuid>,
    },

    /// The receiving user's refreshed view of the conversation.
    #[serde(rename = "conversation.updated")]
    ConversationUpdated { conversation: ConversationView },

    #[serde(rename = "conversation.deleted")]
    ConversationDeleted { conversation_id: Uuid },

    #[serde(rename = "history.cleared")]
    HistoryCleared { conversation_id: Uuid },

    /// Transient; relayed, never persisted.
    #[serde(rename = "typing")]
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
    },
}

impl OutboundEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageNew { .. } => "message.new",
            Self::MessageUpdated { .. } => "message.updated",
            Self::MessagesDeleted { .. } => "messages.deleted",
            Self::MessagesRead { .. } => "messages.read",
            Self::ConversationUpdated { .. } => "conversation.updated",
            Self::ConversationDeleted { .. } => "conversation.deleted",
            Self::HistoryCleared { .. } => "history.cleared",
            Self::Typing { .. } => "typing",
        }
    }

    /// Serialize to the flat wire shape. This is the only place event
    /// serialization happens; handlers never hand-build event JSON.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        let mut payload = serde_json::json!({
            "type": self.event_type(),
            "timestamp": Utc::now().to_rfc3339(),
        });

        // externally tagged: a single-key map of { variant: fields }
        let data = serde_json::to_value(self)?;
        if let serde_json::Value::Object(outer) = data {
            for (_, fields) in outer {
                if let serde_json::Value::Object(map) = fields {
                    for (key, value) in map {
                        payload[key] = value;
                    }
                }
            }
        }

        serde_json::to_string(&payload)
    }
}

pub async fn push_to(registry: &SessionRegistry, user_id: Uuid, event: &OutboundEvent) {
    match event.to_payload() {
        Ok(payload) => registry.send_to(user_id, &payload).await,
        Err(e) => {
            tracing::error!(error = %e, event = event.event_type(), "failed to serialize event")
        }
    }
}

pub async fn push_to_all(registry: &SessionRegistry, user_ids: &[Uuid], event: &OutboundEvent) {
    match event.to_payload() {
        Ok(payload) => registry.send_to_many(user_ids, &payload).await,
        Err(e) => {
            tracing::error!(error = %e, event = event.event_type(), "failed to serialize event")
        }
    }
}

/// Deliver freshly minted copies: each owner gets exactly their own copy.
pub async fn push_new_copies(registry: &SessionRegistry, copies: &[Message]) {
    for copy in copies {
        let event = OutboundEvent::MessageNew {
            conversation_id: copy.conversation_id,
            message: MessageView::from_copy(copy, Vec::new()),
        };
        push_to(registry, copy.owner_id, &event).await;
    }
}

/// Deliver a per-user conversation view to each of the given users. A user
/// whose view can no longer be built (hard-deleted conversation mid-flight)
/// is skipped.
pub async fn push_conversation_update(state: &AppState, conversation_id: Uuid, user_ids: &[Uuid]) {
    for user_id in user_ids {
        match ViewService::conversation_view(
            &state.db,
            state.directory.as_ref(),
            conversation_id,
            *user_id,
        )
        .await
        {
            Ok(view) => {
                push_to(
                    &state.registry,
                    *user_id,
                    &OutboundEvent::ConversationUpdated { conversation: view },
                )
                .await
            }
            Err(e) => {
                tracing::debug!(error = %e, user_id = %user_id, "skipped conversation update push")
            }
        }
    }
}
