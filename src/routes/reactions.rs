use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::Reaction;
use crate::services::mailbox_service::MailboxService;
use crate::state::AppState;
use crate::websocket::events::{self, OutboundEvent};

#[derive(Deserialize)]
pub struct ReactRequest {
    pub emoji: String,
}

#[derive(Serialize)]
pub struct ReactionsResponse {
    pub correlation_id: Uuid,
    pub reactions: Vec<Reaction>,
}

/// POST /messages/{id}/reactions toggles the actor's reaction: same emoji
/// removes it, a different one replaces it. The resulting list is shared by
/// every copy of the logical message.
pub async fn add_reaction(
    State(state): State<AppState>,
    user: User,
    Path(message_id): Path<Uuid>,
    Json(body): Json<ReactRequest>,
) -> Result<Json<ReactionsResponse>, AppError> {
    let outcome = MailboxService::react(
        &state.db,
        state.policy.as_ref(),
        message_id,
        user.id,
        &body.emoji,
    )
    .await?;

    let event = OutboundEvent::MessageUpdated {
        conversation_id: outcome.conversation_id,
        correlation_id: outcome.correlation_id,
        text: None,
        edited_at: None,
        reactions: Some(outcome.reactions.clone()),
    };
    events::push_to_all(&state.registry, &outcome.participants, &event).await;

    Ok(Json(ReactionsResponse {
        correlation_id: outcome.correlation_id,
        reactions: outcome.reactions,
    }))
}
