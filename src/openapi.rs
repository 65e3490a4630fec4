/// OpenAPI documentation for the DM service
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "DM Service API",
        version = "1.0.0",
        description = "Direct messages: per-user mailboxes, conversation state, and real-time sync",
        license(
            name = "MIT"
        )
    ),
    tags(
        (name = "Health", description = "Service health checks"),
        (name = "Conversations", description = "Per-user conversation state and views"),
        (name = "Messages", description = "Mailbox operations: send, edit, delete, forward"),
        (name = "Reactions", description = "Message reactions"),
        (name = "WebSocket", description = "Real-time sync via WebSocket"),
    )
)]
pub struct ApiDoc;
