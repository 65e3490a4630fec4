use crate::state::AppState;
use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Json, Router,
};

pub mod conversations;
pub mod messages;
pub mod reactions;

async fn health() -> &'static str {
    "OK"
}

async fn openapi_json() -> Json<serde_json::Value> {
    use utoipa::OpenApi;
    Json(serde_json::to_value(crate::openapi::ApiDoc::openapi()).unwrap_or_default())
}

pub fn build_router(state: AppState) -> Router {
    // API v1: everything behind bearer auth (the websocket route carries its
    // own token validation, see middleware::auth)
    let api_v1 = Router::new()
        .route("/messages", post(messages::send_message))
        .route("/messages/delete", post(messages::delete_messages))
        .route("/messages/forward", post(messages::forward_messages))
        .route("/messages/:id", put(messages::update_message))
        .route("/messages/:id/reactions", post(reactions::add_reaction))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/:id", get(conversations::get_conversation))
        .route(
            "/conversations/:id/messages",
            get(messages::get_message_page),
        )
        .route(
            "/conversations/:id/messages/jump",
            get(messages::jump_to_page),
        )
        .route(
            "/conversations/:id/messages/search",
            get(messages::search_messages),
        )
        .route(
            "/conversations/:id/messages/:message_id/pin",
            post(conversations::toggle_message_pin),
        )
        .route(
            "/conversations/:id/attachments",
            get(messages::get_attachments),
        )
        .route("/conversations/:id/stats", get(messages::get_stats))
        .route("/conversations/:id/read", post(conversations::mark_read))
        .route("/conversations/:id/unread", post(conversations::mark_unread))
        .route("/conversations/:id/pin", post(conversations::toggle_pin))
        .route("/conversations/:id/mute", post(conversations::toggle_mute))
        .route(
            "/conversations/:id/archive",
            post(conversations::toggle_archive),
        )
        .route(
            "/conversations/:id/wallpaper",
            put(conversations::set_wallpaper).delete(conversations::reset_wallpaper),
        )
        .route("/conversations/:id/clear", post(conversations::clear_history))
        .route("/ws", get(crate::websocket::handlers::ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ));

    // introspection stays public for healthchecks
    let introspection = Router::new()
        .route("/health", get(health))
        .route("/openapi.json", get(openapi_json));

    let router = introspection
        .merge(Router::new().nest("/api/v1", api_v1))
        .with_state(state);

    crate::middleware::with_defaults(router)
}
