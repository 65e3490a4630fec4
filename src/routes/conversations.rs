use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::{Wallpaper, WallpaperKind};
use crate::services::conversation_service::ConversationService;
use crate::services::mailbox_service::MailboxService;
use crate::services::view_service::{ConversationView, ViewService};
use crate::state::AppState;
use crate::websocket::events::{self, OutboundEvent};

/// GET /conversations: the viewer's list, pinned first, then the self-chat,
/// then by latest activity in the viewer's own mailbox.
pub async fn list_conversations(
    State(state): State<AppState>,
    user: User,
) -> Result<Json<Vec<ConversationView>>, AppError> {
    let list =
        ViewService::conversation_list(&state.db, state.directory.as_ref(), user.id).await?;
    Ok(Json(list))
}

/// GET /conversations/{id}: one conversation through the viewer's eyes.
pub async fn get_conversation(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ConversationView>, AppError> {
    let view = ViewService::conversation_view(
        &state.db,
        state.directory.as_ref(),
        conversation_id,
        user.id,
    )
    .await?;
    Ok(Json(view))
}

/// POST /conversations/{id}/read: stamp the viewer's unread copies read and
/// clear the marked-unread flag; the peer gets the read receipt.
pub async fn mark_read(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let outcome = MailboxService::mark_read(&state.db, conversation_id, user.id).await?;

    if !outcome.correlation_ids.is_empty() {
        let event = OutboundEvent::MessagesRead {
            conversation_id: outcome.conversation_id,
            reader_id: outcome.reader,
            correlation_ids: outcome.correlation_ids,
        };
        for peer in outcome.participants.iter().filter(|u| **u != user.id) {
            events::push_to(&state.registry, *peer, &event).await;
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// POST /conversations/{id}/unread: flag unread until the next mark-read.
pub async fn mark_unread(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    ConversationService::mark_unread(&state.db, conversation_id, user.id).await?;
    events::push_conversation_update(&state, conversation_id, &[user.id]).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct ToggleResponse {
    pub enabled: bool,
}

/// POST /conversations/{id}/pin: toggle the conversation in the actor's
/// pinned list (quota-bound, private, unannounced).
pub async fn toggle_pin(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ToggleResponse>, AppError> {
    let pinned = ConversationService::toggle_list_pin(
        &state.db,
        state.directory.as_ref(),
        conversation_id,
        user.id,
    )
    .await?;
    events::push_conversation_update(&state, conversation_id, &[user.id]).await;
    Ok(Json(ToggleResponse { enabled: pinned }))
}

/// POST /conversations/{id}/mute
pub async fn toggle_mute(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ToggleResponse>, AppError> {
    let muted = ConversationService::toggle_mute(&state.db, conversation_id, user.id).await?;
    events::push_conversation_update(&state, conversation_id, &[user.id]).await;
    Ok(Json(ToggleResponse { enabled: muted }))
}

/// POST /conversations/{id}/archive: archiving also drops the conversation
/// from the actor's pinned list.
pub async fn toggle_archive(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ToggleResponse>, AppError> {
    let archived =
        ConversationService::toggle_archive(&state.db, conversation_id, user.id).await?;
    events::push_conversation_update(&state, conversation_id, &[user.id]).await;
    Ok(Json(ToggleResponse { enabled: archived }))
}

/// POST /conversations/{id}/messages/{message_id}/pin: toggle a message in
/// the shared pinned set; announced to everyone via a system message.
pub async fn toggle_message_pin(
    State(state): State<AppState>,
    user: User,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ToggleResponse>, AppError> {
    let outcome = ConversationService::toggle_message_pin(
        &state.db,
        state.directory.as_ref(),
        conversation_id,
        message_id,
        user.id,
    )
    .await?;

    events::push_new_copies(&state.registry, &outcome.announcement).await;
    events::push_conversation_update(&state, conversation_id, &outcome.participants).await;

    Ok(Json(ToggleResponse {
        enabled: outcome.pinned,
    }))
}

#[derive(Deserialize)]
pub struct WallpaperRequest {
    pub kind: WallpaperKind,
    pub value: String,
    #[serde(default)]
    pub apply_for_both: bool,
}

/// PUT /conversations/{id}/wallpaper: per-user by default; apply-for-both
/// pushes the same wallpaper to every participant and announces it.
pub async fn set_wallpaper(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<WallpaperRequest>,
) -> Result<StatusCode, AppError> {
    let outcome = ConversationService::set_wallpaper(
        &state.db,
        state.directory.as_ref(),
        conversation_id,
        user.id,
        Wallpaper {
            kind: body.kind,
            value: body.value,
        },
        body.apply_for_both,
    )
    .await?;

    if outcome.applied_for_both {
        events::push_new_copies(&state.registry, &outcome.announcement).await;
        events::push_conversation_update(&state, conversation_id, &outcome.participants).await;
    } else {
        events::push_conversation_update(&state, conversation_id, &[user.id]).await;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /conversations/{id}/wallpaper: back to the default, actor only.
pub async fn reset_wallpaper(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    ConversationService::reset_wallpaper(&state.db, conversation_id, user.id).await?;
    events::push_conversation_update(&state, conversation_id, &[user.id]).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ClearHistoryRequest {
    #[serde(default)]
    pub for_everyone: bool,
    #[serde(default)]
    pub block_peer: bool,
}

/// POST /conversations/{id}/clear: wipe the actor's mailbox (reviving on the
/// next send), or everything for everyone, optionally blocking the peer.
pub async fn clear_history(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<ClearHistoryRequest>,
) -> Result<StatusCode, AppError> {
    let outcome = ConversationService::clear_history(
        &state.db,
        state.policy.as_ref(),
        conversation_id,
        user.id,
        body.for_everyone,
        body.block_peer,
    )
    .await?;

    if outcome.conversation_deleted {
        let event = OutboundEvent::ConversationDeleted { conversation_id };
        events::push_to_all(&state.registry, &outcome.participants, &event).await;
    } else {
        let event = OutboundEvent::HistoryCleared { conversation_id };
        events::push_to(&state.registry, user.id, &event).await;
    }

    Ok(StatusCode::NO_CONTENT)
}
