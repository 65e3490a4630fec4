use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres, Row};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Message, MessageKind, Participant, Reaction, Wallpaper};
use crate::policy::{UserDirectory, UserProfile};
use crate::services::conversation_service::ConversationService;

pub const PAGE_SIZE: i64 = 30;

/// A message rendered from one viewer's mailbox.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub correlation_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub track_id: Option<String>,
    pub reply_to: Option<Uuid>,
    pub forwarded_from: Option<Uuid>,
    pub read: bool,
    pub reactions: Vec<Reaction>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

impl MessageView {
    pub fn from_copy(message: &Message, reactions: Vec<Reaction>) -> Self {
        Self {
            id: message.id,
            correlation_id: message.correlation_id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            kind: message.kind,
            text: message.text.clone(),
            image_url: message.image_url.clone(),
            track_id: message.track_id.clone(),
            reply_to: message.reply_to,
            forwarded_from: message.forwarded_from,
            read: message.read_at.is_some(),
            reactions,
            created_at: message.created_at,
            edited_at: message.edited_at,
        }
    }
}

/// One conversation as a specific viewer sees it.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub id: Uuid,
    pub peer: UserProfile,
    pub self_chat: bool,
    pub last_message: Option<MessageView>,
    pub pinned_messages: Vec<MessageView>,
    pub muted: bool,
    pub archived: bool,
    pub pinned: bool,
    pub marked_unread: bool,
    pub wallpaper: Option<Wallpaper>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Track,
}

#[derive(Debug, Serialize)]
pub struct AttachmentPage {
    pub total: i64,
    pub page: i64,
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Serialize)]
pub struct ConversationStats {
    pub sent: i64,
    pub received: i64,
    pub reactions: i64,
    pub photos: i64,
}

/// Conversation-list ordering: list-pinned first (newest pin first), then the
/// self-chat, then everything else by latest own-mailbox activity.
pub(crate) fn list_sort_key(
    pinned: bool,
    pinned_at_ms: Option<i64>,
    self_chat: bool,
    activity_ms: i64,
) -> (u8, i64) {
    if pinned {
        (0, -pinned_at_ms.unwrap_or(activity_ms))
    } else if self_chat {
        (1, -activity_ms)
    } else {
        (2, -activity_ms)
    }
}

/// Escape LIKE wildcards so a search query is matched literally.
pub(crate) fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub struct ViewService;

impl ViewService {
    /// The viewer's conversation list. Everything in it is derived from the
    /// viewer's own mailbox; the other participant's copies never leak in.
    pub async fn conversation_list(
        db: &Pool<Postgres>,
        directory: &dyn UserDirectory,
        user: Uuid,
    ) -> AppResult<Vec<ConversationView>> {
        let rows = sqlx::query(
            "SELECT c.created_at AS conversation_created_at, \
                    cp.conversation_id, cp.user_id, cp.muted, cp.archived, cp.pinned, \
                    cp.pinned_at, cp.marked_unread, cp.cleared, cp.wallpaper_kind, cp.wallpaper_value \
             FROM conversations c \
             JOIN conversation_participants cp ON cp.conversation_id = c.id \
             WHERE cp.user_id = $1 AND NOT cp.cleared",
        )
        .bind(user)
        .fetch_all(db)
        .await?;

        let mut profiles: HashMap<Uuid, UserProfile> = HashMap::new();
        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let participant = Participant::from_row(row);
            let conversation_created_at: DateTime<Utc> = row.get("conversation_created_at");
            let view = Self::build_view(
                db,
                directory,
                &mut profiles,
                &participant,
                conversation_created_at,
            )
            .await?;
            entries.push(view);
        }

        entries.sort_by_key(|(key, _)| *key);
        Ok(entries.into_iter().map(|(_, view)| view).collect())
    }

    /// The per-viewer projection of a single conversation.
    pub async fn conversation_view(
        db: &Pool<Postgres>,
        directory: &dyn UserDirectory,
        conversation_id: Uuid,
        user: Uuid,
    ) -> AppResult<ConversationView> {
        let participant =
            ConversationService::require_participant(db, conversation_id, user).await?;
        let conversation = ConversationService::get(db, conversation_id).await?;
        let mut profiles = HashMap::new();
        let (_, view) = Self::build_view(
            db,
            directory,
            &mut profiles,
            &participant,
            conversation.created_at,
        )
        .await?;
        Ok(view)
    }

    async fn build_view(
        db: &Pool<Postgres>,
        directory: &dyn UserDirectory,
        profiles: &mut HashMap<Uuid, UserProfile>,
        participant: &Participant,
        conversation_created_at: DateTime<Utc>,
    ) -> AppResult<((u8, i64), ConversationView)> {
        let conversation_id = participant.conversation_id;
        let user = participant.user_id;

        let participants = ConversationService::participants(db, conversation_id).await?;
        let peer_id = participants
            .iter()
            .copied()
            .find(|u| *u != user)
            .unwrap_or(user);
        let self_chat = peer_id == user;

        let peer = match profiles.get(&peer_id) {
            Some(profile) => profile.clone(),
            None => {
                let profile = directory.profile(peer_id).await?;
                profiles.insert(peer_id, profile.clone());
                profile
            }
        };

        let last_row = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = $1 AND owner_id = $2 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(conversation_id)
        .bind(user)
        .fetch_optional(db)
        .await?;
        let last = last_row.as_ref().map(Message::from_row);

        let unread_count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages \
             WHERE conversation_id = $1 AND owner_id = $2 AND read_at IS NULL \
               AND (sender_id IS NULL OR sender_id <> $2)",
        )
        .bind(conversation_id)
        .bind(user)
        .fetch_one(db)
        .await?;

        // A pin is stored against one physical copy; render it from the
        // viewer's own copy so read/deletion state stays theirs. Pins whose
        // viewer copy is gone simply don't render.
        let pinned_rows = sqlx::query(
            "SELECT own.* FROM conversation_pinned_messages cpm \
             JOIN messages pin ON pin.id = cpm.message_id \
             JOIN messages own ON own.correlation_id = pin.correlation_id AND own.owner_id = $2 \
             WHERE cpm.conversation_id = $1 \
             ORDER BY cpm.created_at ASC",
        )
        .bind(conversation_id)
        .bind(user)
        .fetch_all(db)
        .await?;
        let pinned: Vec<Message> = pinned_rows.iter().map(Message::from_row).collect();

        let mut correlations: Vec<Uuid> = pinned.iter().map(|m| m.correlation_id).collect();
        if let Some(last) = &last {
            correlations.push(last.correlation_id);
        }
        let mut reactions = Self::reactions_by_correlation(db, &correlations).await?;

        let last_message = last.as_ref().map(|m| {
            MessageView::from_copy(m, reactions.remove(&m.correlation_id).unwrap_or_default())
        });
        let pinned_messages = pinned
            .iter()
            .map(|m| {
                MessageView::from_copy(m, reactions.remove(&m.correlation_id).unwrap_or_default())
            })
            .collect();

        let activity = last
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or(conversation_created_at);
        let key = list_sort_key(
            participant.pinned,
            participant.pinned_at.map(|t| t.timestamp_millis()),
            self_chat,
            activity.timestamp_millis(),
        );

        let view = ConversationView {
            id: conversation_id,
            peer,
            self_chat,
            last_message,
            pinned_messages,
            muted: participant.muted,
            archived: participant.archived,
            pinned: participant.pinned,
            marked_unread: participant.marked_unread,
            wallpaper: participant.wallpaper.clone(),
            unread_count,
        };
        Ok((key, view))
    }

    /// One page of the viewer's mailbox, newest page first, each page in
    /// chronological order for delivery.
    pub async fn message_page(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user: Uuid,
        page: i64,
    ) -> AppResult<Vec<MessageView>> {
        ConversationService::require_participant(db, conversation_id, user).await?;
        let page = page.max(0);

        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = $1 AND owner_id = $2 \
             ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4",
        )
        .bind(conversation_id)
        .bind(user)
        .bind(PAGE_SIZE)
        .bind(page * PAGE_SIZE)
        .fetch_all(db)
        .await?;

        let mut messages: Vec<Message> = rows.iter().map(Message::from_row).collect();
        messages.reverse();
        Self::render_messages(db, &messages).await
    }

    /// Page index that contains the viewer's copy of the given logical
    /// message: the count of strictly newer copies in their mailbox, divided
    /// by the page size.
    pub async fn jump_to_message(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user: Uuid,
        correlation_id: Uuid,
    ) -> AppResult<i64> {
        ConversationService::require_participant(db, conversation_id, user).await?;

        let row = sqlx::query(
            "SELECT id, created_at FROM messages \
             WHERE conversation_id = $1 AND owner_id = $2 AND correlation_id = $3",
        )
        .bind(conversation_id)
        .bind(user)
        .bind(correlation_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)?;

        let id: Uuid = row.get("id");
        let created_at: DateTime<Utc> = row.get("created_at");
        Self::page_of(db, conversation_id, user, created_at, id).await
    }

    /// Page index of the first message on or after the given date.
    pub async fn jump_to_date(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user: Uuid,
        date: DateTime<Utc>,
    ) -> AppResult<i64> {
        ConversationService::require_participant(db, conversation_id, user).await?;

        let row = sqlx::query(
            "SELECT id, created_at FROM messages \
             WHERE conversation_id = $1 AND owner_id = $2 AND created_at >= $3 \
             ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .bind(conversation_id)
        .bind(user)
        .bind(date)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)?;

        let id: Uuid = row.get("id");
        let created_at: DateTime<Utc> = row.get("created_at");
        Self::page_of(db, conversation_id, user, created_at, id).await
    }

    async fn page_of(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user: Uuid,
        created_at: DateTime<Utc>,
        id: Uuid,
    ) -> AppResult<i64> {
        let newer = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages \
             WHERE conversation_id = $1 AND owner_id = $2 \
               AND (created_at > $3 OR (created_at = $3 AND id > $4))",
        )
        .bind(conversation_id)
        .bind(user)
        .bind(created_at)
        .bind(id)
        .fetch_one(db)
        .await?;
        Ok(newer / PAGE_SIZE)
    }

    /// Case-insensitive substring search over the viewer's own user-typed
    /// copies. Returns copy ids, newest first.
    pub async fn search(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user: Uuid,
        query: &str,
    ) -> AppResult<Vec<Uuid>> {
        ConversationService::require_participant(db, conversation_id, user).await?;
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::BadRequest("search query cannot be empty".into()));
        }

        let pattern = format!("%{}%", escape_like(query));
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM messages \
             WHERE conversation_id = $1 AND owner_id = $2 AND kind = 'user' \
               AND text ILIKE $3 ESCAPE '\\' \
             ORDER BY created_at DESC, id DESC",
        )
        .bind(conversation_id)
        .bind(user)
        .bind(pattern)
        .fetch_all(db)
        .await?;
        Ok(ids)
    }

    /// Paginated media lists scoped to the viewer's mailbox.
    pub async fn attachments(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user: Uuid,
        kind: AttachmentKind,
        page: i64,
    ) -> AppResult<AttachmentPage> {
        ConversationService::require_participant(db, conversation_id, user).await?;
        let page = page.max(0);
        let filter = match kind {
            AttachmentKind::Image => "image_url IS NOT NULL",
            AttachmentKind::Track => "track_id IS NOT NULL",
        };

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM messages \
             WHERE conversation_id = $1 AND owner_id = $2 AND {filter}"
        ))
        .bind(conversation_id)
        .bind(user)
        .fetch_one(db)
        .await?;

        let rows = sqlx::query(&format!(
            "SELECT * FROM messages \
             WHERE conversation_id = $1 AND owner_id = $2 AND {filter} \
             ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4"
        ))
        .bind(conversation_id)
        .bind(user)
        .bind(PAGE_SIZE)
        .bind(page * PAGE_SIZE)
        .fetch_all(db)
        .await?;

        let messages: Vec<Message> = rows.iter().map(Message::from_row).collect();
        let messages = Self::render_messages(db, &messages).await?;
        Ok(AttachmentPage {
            total,
            page,
            messages,
        })
    }

    /// Aggregate counters over the viewer's mailbox.
    pub async fn stats(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user: Uuid,
    ) -> AppResult<ConversationStats> {
        ConversationService::require_participant(db, conversation_id, user).await?;

        let row = sqlx::query(
            "SELECT \
               COUNT(*) FILTER (WHERE sender_id = $2) AS sent, \
               COUNT(*) FILTER (WHERE kind = 'user' AND (sender_id IS NULL OR sender_id <> $2)) AS received, \
               COUNT(*) FILTER (WHERE image_url IS NOT NULL) AS photos \
             FROM messages WHERE conversation_id = $1 AND owner_id = $2",
        )
        .bind(conversation_id)
        .bind(user)
        .fetch_one(db)
        .await?;

        let reactions = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM message_reactions r \
             WHERE EXISTS (SELECT 1 FROM messages m \
                           WHERE m.correlation_id = r.message_uuid \
                             AND m.conversation_id = $1 AND m.owner_id = $2)",
        )
        .bind(conversation_id)
        .bind(user)
        .fetch_one(db)
        .await?;

        Ok(ConversationStats {
            sent: row.get("sent"),
            received: row.get("received"),
            reactions,
            photos: row.get("photos"),
        })
    }

    async fn render_messages(
        db: &Pool<Postgres>,
        messages: &[Message],
    ) -> AppResult<Vec<MessageView>> {
        let correlations: Vec<Uuid> = messages.iter().map(|m| m.correlation_id).collect();
        let mut reactions = Self::reactions_by_correlation(db, &correlations).await?;
        Ok(messages
            .iter()
            .map(|m| {
                MessageView::from_copy(m, reactions.remove(&m.correlation_id).unwrap_or_default())
            })
            .collect())
    }

    async fn reactions_by_correlation(
        db: &Pool<Postgres>,
        correlation_ids: &[Uuid],
    ) -> AppResult<HashMap<Uuid, Vec<Reaction>>> {
        if correlation_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            "SELECT message_uuid, user_id, emoji FROM message_reactions \
             WHERE message_uuid = ANY($1) ORDER BY created_at, user_id",
        )
        .bind(correlation_ids)
        .fetch_all(db)
        .await?;

        let mut map: HashMap<Uuid, Vec<Reaction>> = HashMap::new();
        for row in rows {
            let correlation: Uuid = row.get("message_uuid");
            map.entry(correlation).or_default().push(Reaction {
                user_id: row.get("user_id"),
                emoji: row.get("emoji"),
            });
        }
        Ok(map)
    }
}
