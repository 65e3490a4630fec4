use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::auth::verify_jwt;
use crate::services::conversation_service::ConversationService;
use crate::state::AppState;
use crate::websocket::events::{self, OutboundEvent};
use crate::websocket::message_types::WsInboundEvent;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

fn bearer_token(params: &WsParams, headers: &HeaderMap) -> Option<String> {
    params.token.clone().or_else(|| {
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.to_string())
    })
}

/// WebSocket upgrade. Identity comes from the token alone; the registry keeps
/// one live channel per user, so connecting again supersedes the old socket.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_id = match bearer_token(&params, &headers)
        .and_then(|token| verify_jwt(&token, &state.config.jwt_secret).ok())
        .and_then(|claims| Uuid::parse_str(&claims.sub).ok())
    {
        Some(id) => id,
        None => {
            tracing::warn!("websocket connection rejected: missing or invalid token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(state, user_id, socket))
        .into_response()
}

async fn handle_socket(state: AppState, user_id: Uuid, socket: WebSocket) {
    let (session_id, mut rx) = state.registry.register(user_id).await;
    tracing::info!(%user_id, "live channel opened");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(payload) => {
                    if sender.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                // registry entry replaced by a reconnect
                None => break,
            },

            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<WsInboundEvent>(&text) {
                        Ok(event) => handle_inbound(&state, user_id, event).await,
                        Err(e) => tracing::debug!(error = %e, "ignoring malformed ws message"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }

    state.registry.unregister(user_id, session_id).await;
    tracing::info!(%user_id, "live channel closed");
}

async fn handle_inbound(state: &AppState, user_id: Uuid, event: WsInboundEvent) {
    match event {
        WsInboundEvent::Typing { conversation_id } => {
            let participants =
                match ConversationService::participants(&state.db, conversation_id).await {
                    Ok(participants) => participants,
                    Err(e) => {
                        tracing::debug!(error = %e, "typing relay skipped");
                        return;
                    }
                };
            // only participants may signal, and only the others hear it
            if !participants.contains(&user_id) {
                return;
            }
            let event = OutboundEvent::Typing {
                conversation_id,
                user_id,
            };
            for peer in participants.iter().filter(|u| **u != user_id) {
                events::push_to(&state.registry, *peer, &event).await;
            }
        }
    }
}
