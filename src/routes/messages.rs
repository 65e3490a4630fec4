use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::guards::User;
use crate::services::mailbox_service::{MailboxService, MessageContent};
use crate::services::view_service::{
    AttachmentKind, AttachmentPage, ConversationStats, MessageView, ViewService,
};
use crate::state::AppState;
use crate::websocket::events::{self, OutboundEvent};

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: Uuid,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub track_id: Option<String>,
    pub reply_to: Option<Uuid>,
}

/// POST /messages: send to a user (self included: that is the self-chat).
/// The conversation is found or created from the participant pair.
pub async fn send_message(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<MessageView>, AppError> {
    let content = MessageContent {
        text: body.text,
        image_url: body.image_url,
        track_id: body.track_id,
    };
    let outcome = MailboxService::send(
        &state.db,
        state.policy.as_ref(),
        user.id,
        body.recipient_id,
        content,
        body.reply_to,
    )
    .await?;

    events::push_new_copies(&state.registry, &outcome.copies).await;

    let own = outcome
        .copies
        .iter()
        .find(|c| c.owner_id == user.id)
        .ok_or(AppError::Internal)?;
    Ok(Json(MessageView::from_copy(own, Vec::new())))
}

#[derive(Deserialize)]
pub struct UpdateMessageRequest {
    pub text: String,
}

/// PUT /messages/{id}: author-only edit, fanned out to every copy.
pub async fn update_message(
    State(state): State<AppState>,
    user: User,
    Path(message_id): Path<Uuid>,
    Json(body): Json<UpdateMessageRequest>,
) -> Result<StatusCode, AppError> {
    let outcome = MailboxService::edit(&state.db, message_id, user.id, &body.text).await?;

    let event = OutboundEvent::MessageUpdated {
        conversation_id: outcome.conversation_id,
        correlation_id: outcome.correlation_id,
        text: Some(outcome.text),
        edited_at: Some(outcome.edited_at),
        reactions: None,
    };
    events::push_to_all(&state.registry, &outcome.participants, &event).await;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct DeleteMessagesRequest {
    pub ids: Vec<Uuid>,
    #[serde(default)]
    pub for_everyone: bool,
}

#[derive(Serialize)]
pub struct DeleteMessagesResponse {
    pub deleted: Vec<Uuid>,
    pub for_everyone: bool,
}

/// POST /messages/delete: either the actor's own copies, or (sender only)
/// every copy of the logical messages.
pub async fn delete_messages(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<DeleteMessagesRequest>,
) -> Result<Json<DeleteMessagesResponse>, AppError> {
    let outcome = MailboxService::delete(
        &state.db,
        state.policy.as_ref(),
        &body.ids,
        body.for_everyone,
        user.id,
    )
    .await?;

    let event = OutboundEvent::MessagesDeleted {
        conversation_id: outcome.conversation_id,
        ids: outcome.deleted.clone(),
        for_everyone: outcome.for_everyone,
    };
    if outcome.for_everyone {
        events::push_to_all(&state.registry, &outcome.participants, &event).await;
    } else {
        // one-sided: the peer's mailbox is untouched, nothing for them to see
        events::push_to(&state.registry, user.id, &event).await;
    }

    Ok(Json(DeleteMessagesResponse {
        deleted: outcome.deleted,
        for_everyone: outcome.for_everyone,
    }))
}

#[derive(Deserialize)]
pub struct ForwardMessagesRequest {
    pub ids: Vec<Uuid>,
    pub conversation_ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct ForwardedConversation {
    pub conversation_id: Uuid,
    pub messages: Vec<MessageView>,
}

/// POST /messages/forward: re-mint messages from the actor's mailbox into
/// other conversations under fresh correlation ids.
pub async fn forward_messages(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<ForwardMessagesRequest>,
) -> Result<Json<Vec<ForwardedConversation>>, AppError> {
    let outcomes = MailboxService::forward(
        &state.db,
        state.policy.as_ref(),
        &body.ids,
        &body.conversation_ids,
        user.id,
    )
    .await?;

    let mut response = Vec::with_capacity(outcomes.len());
    for outcome in &outcomes {
        events::push_new_copies(&state.registry, &outcome.copies).await;
        response.push(ForwardedConversation {
            conversation_id: outcome.conversation_id,
            messages: outcome
                .copies
                .iter()
                .filter(|c| c.owner_id == user.id)
                .map(|c| MessageView::from_copy(c, Vec::new()))
                .collect(),
        });
    }

    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: i64,
}

/// GET /conversations/{id}/messages?page= returns 30 per page, newest first,
/// each page delivered in chronological order.
pub async fn get_message_page(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<MessageView>>, AppError> {
    let messages =
        ViewService::message_page(&state.db, conversation_id, user.id, params.page).await?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
pub struct JumpParams {
    pub message: Option<Uuid>,
    pub date: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct JumpResponse {
    pub page: i64,
}

/// GET /conversations/{id}/messages/jump?message=|date= computes the page
/// for jump-to-message (by logical id) and jump-to-date.
pub async fn jump_to_page(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<JumpParams>,
) -> Result<Json<JumpResponse>, AppError> {
    let page = match (params.message, params.date) {
        (Some(correlation_id), _) => {
            ViewService::jump_to_message(&state.db, conversation_id, user.id, correlation_id)
                .await?
        }
        (None, Some(date)) => {
            ViewService::jump_to_date(&state.db, conversation_id, user.id, date).await?
        }
        (None, None) => {
            return Err(AppError::BadRequest(
                "jump needs a message id or a date".into(),
            ))
        }
    };
    Ok(Json(JumpResponse { page }))
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub ids: Vec<Uuid>,
}

/// GET /conversations/{id}/messages/search?q= runs a case-insensitive
/// substring match over the viewer's own copies, newest first.
pub async fn search_messages(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let ids = ViewService::search(&state.db, conversation_id, user.id, &params.q).await?;
    Ok(Json(SearchResponse { ids }))
}

#[derive(Deserialize)]
pub struct AttachmentParams {
    pub kind: AttachmentKind,
    #[serde(default)]
    pub page: i64,
}

/// GET /conversations/{id}/attachments?kind=image|track&page=
pub async fn get_attachments(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<AttachmentParams>,
) -> Result<Json<AttachmentPage>, AppError> {
    let page = ViewService::attachments(
        &state.db,
        conversation_id,
        user.id,
        params.kind,
        params.page,
    )
    .await?;
    Ok(Json(page))
}

/// GET /conversations/{id}/stats: aggregate counters for the viewer.
pub async fn get_stats(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ConversationStats>, AppError> {
    let stats = ViewService::stats(&state.db, conversation_id, user.id).await?;
    Ok(Json(stats))
}
