use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Message, MessageKind, Reaction};
use crate::policy::{AccessPolicy, PolicyAction};
use crate::services::conversation_service::ConversationService;

/// User-supplied message payload. A user message must carry at least one of
/// the three parts; system messages bypass this through their own path.
#[derive(Debug, Clone, Default)]
pub struct MessageContent {
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub track_id: Option<String>,
}

impl MessageContent {
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().map_or(true, |t| t.trim().is_empty())
            && self.image_url.is_none()
            && self.track_id.is_none()
    }
}

#[derive(Debug)]
pub struct SendOutcome {
    pub conversation_id: Uuid,
    /// One copy per participant, all sharing a correlation id.
    pub copies: Vec<Message>,
    pub participants: Vec<Uuid>,
}

#[derive(Debug)]
pub struct EditOutcome {
    pub conversation_id: Uuid,
    pub correlation_id: Uuid,
    pub text: String,
    pub edited_at: DateTime<Utc>,
    pub participants: Vec<Uuid>,
}

#[derive(Debug)]
pub struct ReactOutcome {
    pub conversation_id: Uuid,
    pub correlation_id: Uuid,
    pub reactions: Vec<Reaction>,
    pub participants: Vec<Uuid>,
}

#[derive(Debug)]
pub struct DeleteOutcome {
    pub conversation_id: Uuid,
    /// Copy ids for an own-copies delete, correlation ids for a
    /// delete-for-everyone.
    pub deleted: Vec<Uuid>,
    pub for_everyone: bool,
    pub participants: Vec<Uuid>,
}

pub struct ReadOutcome {
    pub conversation_id: Uuid,
    pub reader: Uuid,
    pub correlation_ids: Vec<Uuid>,
    pub participants: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionChange {
    Add,
    Remove,
    Replace,
}

/// Toggle semantics for reactions: same emoji removes, different emoji
/// replaces, no prior entry appends.
pub fn reaction_transition(existing: Option<&str>, incoming: &str) -> ReactionChange {
    match existing {
        None => ReactionChange::Add,
        Some(current) if current == incoming => ReactionChange::Remove,
        Some(_) => ReactionChange::Replace,
    }
}

pub struct MailboxService;

impl MailboxService {
    /// Send a message from `sender` to `recipient` (sender == recipient is
    /// the self-chat). Creates one copy per participant under a fresh
    /// correlation id, with the sender's own copy born read, and revives the
    /// conversation for anyone who had cleared it.
    pub async fn send(
        db: &Pool<Postgres>,
        policy: &dyn AccessPolicy,
        sender: Uuid,
        recipient: Uuid,
        content: MessageContent,
        reply_to: Option<Uuid>,
    ) -> AppResult<SendOutcome> {
        if content.is_empty() {
            return Err(AppError::BadRequest(
                "message needs text, an image, or an attached track".into(),
            ));
        }
        if sender != recipient
            && !policy
                .is_allowed(PolicyAction::Message, sender, recipient)
                .await?
        {
            return Err(AppError::Forbidden);
        }

        let conversation = ConversationService::find_or_create(db, sender, recipient).await?;
        let participants = ConversationService::participants(db, conversation.id).await?;

        let copies = Self::insert_copies(
            db,
            conversation.id,
            &participants,
            Some(sender),
            MessageKind::User,
            &content,
            reply_to,
            None,
            sender,
        )
        .await?;

        let sender_copy_id = copies
            .iter()
            .find(|c| c.owner_id == sender)
            .map(|c| c.id)
            .unwrap_or(copies[0].id);
        Self::touch_conversation(db, conversation.id, sender_copy_id).await?;

        Ok(SendOutcome {
            conversation_id: conversation.id,
            copies,
            participants,
        })
    }

    /// Edit the text of a logical message. Author-only; the new text is
    /// fanned out to every copy sharing the correlation id.
    pub async fn edit(
        db: &Pool<Postgres>,
        message_id: Uuid,
        actor: Uuid,
        new_text: &str,
    ) -> AppResult<EditOutcome> {
        let text = new_text.trim();
        if text.is_empty() {
            return Err(AppError::BadRequest("message text cannot be empty".into()));
        }

        let message = Self::get_copy(db, message_id).await?;
        if message.sender_id != Some(actor) {
            return Err(AppError::Forbidden);
        }

        let edited_at = Utc::now();
        sqlx::query("UPDATE messages SET text = $1, edited_at = $2 WHERE correlation_id = $3")
            .bind(text)
            .bind(edited_at)
            .bind(message.correlation_id)
            .execute(db)
            .await?;

        let participants = ConversationService::participants(db, message.conversation_id).await?;
        Ok(EditOutcome {
            conversation_id: message.conversation_id,
            correlation_id: message.correlation_id,
            text: text.to_string(),
            edited_at,
            participants,
        })
    }

    /// Toggle the actor's reaction on a logical message. The reaction list is
    /// keyed by the correlation id, so every copy observes the same list.
    pub async fn react(
        db: &Pool<Postgres>,
        policy: &dyn AccessPolicy,
        message_id: Uuid,
        actor: Uuid,
        emoji: &str,
    ) -> AppResult<ReactOutcome> {
        let emoji = emoji.trim();
        if emoji.is_empty() || emoji.len() > 20 {
            return Err(AppError::BadRequest("invalid emoji".into()));
        }

        let message = Self::get_copy(db, message_id).await?;
        ConversationService::require_participant(db, message.conversation_id, actor).await?;
        let participants = ConversationService::participants(db, message.conversation_id).await?;

        if let Some(peer) = participants.iter().copied().find(|u| *u != actor) {
            if !policy.is_allowed(PolicyAction::React, actor, peer).await? {
                return Err(AppError::Forbidden);
            }
        }

        let existing = sqlx::query_scalar::<_, String>(
            "SELECT emoji FROM message_reactions WHERE message_uuid = $1 AND user_id = $2",
        )
        .bind(message.correlation_id)
        .bind(actor)
        .fetch_optional(db)
        .await?;

        match reaction_transition(existing.as_deref(), emoji) {
            ReactionChange::Remove => {
                sqlx::query(
                    "DELETE FROM message_reactions WHERE message_uuid = $1 AND user_id = $2",
                )
                .bind(message.correlation_id)
                .bind(actor)
                .execute(db)
                .await?;
            }
            ReactionChange::Replace => {
                sqlx::query(
                    "UPDATE message_reactions SET emoji = $3, created_at = NOW() \
                     WHERE message_uuid = $1 AND user_id = $2",
                )
                .bind(message.correlation_id)
                .bind(actor)
                .bind(emoji)
                .execute(db)
                .await?;
            }
            ReactionChange::Add => {
                sqlx::query(
                    "INSERT INTO message_reactions (message_uuid, user_id, emoji) \
                     VALUES ($1, $2, $3)",
                )
                .bind(message.correlation_id)
                .bind(actor)
                .bind(emoji)
                .execute(db)
                .await?;
            }
        }

        let reactions = Self::reactions_for(db, message.correlation_id).await?;
        Ok(ReactOutcome {
            conversation_id: message.conversation_id,
            correlation_id: message.correlation_id,
            reactions,
            participants,
        })
    }

    /// Delete messages, either from the actor's mailbox only or, for the
    /// original sender, every copy of the logical messages.
    pub async fn delete(
        db: &Pool<Postgres>,
        policy: &dyn AccessPolicy,
        message_ids: &[Uuid],
        for_everyone: bool,
        actor: Uuid,
    ) -> AppResult<DeleteOutcome> {
        if message_ids.is_empty() {
            return Err(AppError::BadRequest("no messages given".into()));
        }

        let rows = sqlx::query("SELECT * FROM messages WHERE id = ANY($1)")
            .bind(message_ids)
            .fetch_all(db)
            .await?;
        let copies: Vec<Message> = rows.iter().map(Message::from_row).collect();
        if copies.is_empty() {
            return Err(AppError::NotFound);
        }

        let conversation_id = copies[0].conversation_id;
        if copies.iter().any(|c| c.conversation_id != conversation_id) {
            return Err(AppError::BadRequest("messages span conversations".into()));
        }

        let participants = ConversationService::participants(db, conversation_id).await?;
        if !participants.contains(&actor) {
            return Err(AppError::Forbidden);
        }

        let deleted = if for_everyone {
            if copies.iter().any(|c| c.sender_id != Some(actor)) {
                return Err(AppError::Forbidden);
            }
            if let Some(peer) = participants.iter().copied().find(|u| *u != actor) {
                if !policy
                    .is_allowed(PolicyAction::DeleteForEveryone, actor, peer)
                    .await?
                    || policy.is_blocked(actor, peer).await?
                {
                    return Err(AppError::Forbidden);
                }
            }

            let mut correlations: Vec<Uuid> = copies.iter().map(|c| c.correlation_id).collect();
            correlations.sort();
            correlations.dedup();

            sqlx::query("DELETE FROM message_reactions WHERE message_uuid = ANY($1)")
                .bind(&correlations)
                .execute(db)
                .await?;
            // pins referencing these copies go via the FK cascade
            sqlx::query("DELETE FROM messages WHERE correlation_id = ANY($1)")
                .bind(&correlations)
                .execute(db)
                .await?;
            correlations
        } else {
            let own: Vec<Uuid> = copies
                .iter()
                .filter(|c| c.owner_id == actor)
                .map(|c| c.id)
                .collect();
            if own.is_empty() {
                return Err(AppError::NotFound);
            }
            let correlations: Vec<Uuid> = copies
                .iter()
                .filter(|c| c.owner_id == actor)
                .map(|c| c.correlation_id)
                .collect();

            Self::repoint_pins_for_copies(db, &own).await?;
            sqlx::query("DELETE FROM messages WHERE id = ANY($1)")
                .bind(&own)
                .execute(db)
                .await?;
            Self::sweep_orphaned_reactions(db, &correlations).await?;
            own
        };

        Self::recompute_last_message(db, conversation_id).await?;

        Ok(DeleteOutcome {
            conversation_id,
            deleted,
            for_everyone,
            participants,
        })
    }

    /// Forward messages from the actor's mailbox into other conversations.
    /// Each forwarded message gets a fresh correlation id and carries the
    /// original sender, never the reactions.
    pub async fn forward(
        db: &Pool<Postgres>,
        policy: &dyn AccessPolicy,
        message_ids: &[Uuid],
        target_conversation_ids: &[Uuid],
        actor: Uuid,
    ) -> AppResult<Vec<SendOutcome>> {
        if message_ids.is_empty() || target_conversation_ids.is_empty() {
            return Err(AppError::BadRequest(
                "forward needs messages and target conversations".into(),
            ));
        }

        let rows = sqlx::query(
            "SELECT * FROM messages WHERE id = ANY($1) AND owner_id = $2 \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(message_ids)
        .bind(actor)
        .fetch_all(db)
        .await?;
        let sources: Vec<Message> = rows.iter().map(Message::from_row).collect();
        if sources.is_empty() {
            return Err(AppError::NotFound);
        }

        let mut outcomes = Vec::with_capacity(target_conversation_ids.len());
        for target in target_conversation_ids {
            ConversationService::get(db, *target).await?;
            let participants = ConversationService::participants(db, *target).await?;
            if !participants.contains(&actor) {
                return Err(AppError::Forbidden);
            }
            if let Some(peer) = participants.iter().copied().find(|u| *u != actor) {
                if !policy.is_allowed(PolicyAction::Message, actor, peer).await? {
                    return Err(AppError::Forbidden);
                }
            }

            let mut copies = Vec::new();
            let mut last_own_copy = None;
            for source in &sources {
                let content = MessageContent {
                    text: source.text.clone(),
                    image_url: source.image_url.clone(),
                    track_id: source.track_id.clone(),
                };
                // original sender propagates through chains of forwards;
                // forwarding one's own message carries no attribution
                let origin = source.forwarded_from.or(source.sender_id);
                let forwarded_from = origin.filter(|o| *o != actor);

                let minted = Self::insert_copies(
                    db,
                    *target,
                    &participants,
                    Some(actor),
                    MessageKind::User,
                    &content,
                    None,
                    forwarded_from,
                    actor,
                )
                .await?;
                if let Some(own) = minted.iter().find(|c| c.owner_id == actor) {
                    last_own_copy = Some(own.id);
                }
                copies.extend(minted);
            }

            if let Some(last) = last_own_copy {
                Self::touch_conversation(db, *target, last).await?;
            }

            outcomes.push(SendOutcome {
                conversation_id: *target,
                copies,
                participants,
            });
        }

        Ok(outcomes)
    }

    /// Mark the actor's mailbox for a conversation read, clearing the
    /// marked-unread flag set by the conversation aggregate.
    pub async fn mark_read(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        actor: Uuid,
    ) -> AppResult<ReadOutcome> {
        ConversationService::require_participant(db, conversation_id, actor).await?;

        let correlation_ids = sqlx::query_scalar::<_, Uuid>(
            "UPDATE messages SET read_at = NOW() \
             WHERE conversation_id = $1 AND owner_id = $2 AND read_at IS NULL \
               AND (sender_id IS NULL OR sender_id <> $2) \
             RETURNING correlation_id",
        )
        .bind(conversation_id)
        .bind(actor)
        .fetch_all(db)
        .await?;

        sqlx::query(
            "UPDATE conversation_participants SET marked_unread = FALSE \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(actor)
        .execute(db)
        .await?;

        let participants = ConversationService::participants(db, conversation_id).await?;
        Ok(ReadOutcome {
            conversation_id,
            reader: actor,
            correlation_ids,
            participants,
        })
    }

    /// Record a system-generated message (pin and wallpaper announcements).
    /// No sender; the acting user's copy is born read.
    pub async fn record_system_message(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        participants: &[Uuid],
        actor: Uuid,
        text: &str,
    ) -> AppResult<Vec<Message>> {
        let content = MessageContent {
            text: Some(text.to_string()),
            image_url: None,
            track_id: None,
        };
        let copies = Self::insert_copies(
            db,
            conversation_id,
            participants,
            None,
            MessageKind::System,
            &content,
            None,
            None,
            actor,
        )
        .await?;

        let anchor = copies
            .iter()
            .find(|c| c.owner_id == actor)
            .map(|c| c.id)
            .unwrap_or(copies[0].id);
        Self::touch_conversation(db, conversation_id, anchor).await?;
        Ok(copies)
    }

    pub async fn get_copy(db: &Pool<Postgres>, message_id: Uuid) -> AppResult<Message> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = $1")
            .bind(message_id)
            .fetch_optional(db)
            .await?
            .ok_or(AppError::NotFound)?;
        Ok(Message::from_row(&row))
    }

    pub async fn reactions_for(
        db: &Pool<Postgres>,
        correlation_id: Uuid,
    ) -> AppResult<Vec<Reaction>> {
        let rows = sqlx::query(
            "SELECT user_id, emoji FROM message_reactions \
             WHERE message_uuid = $1 ORDER BY created_at, user_id",
        )
        .bind(correlation_id)
        .fetch_all(db)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                use sqlx::Row;
                Reaction {
                    user_id: row.get("user_id"),
                    emoji: row.get("emoji"),
                }
            })
            .collect())
    }

    /// One insert per participant; a crash in the middle leaves the copies
    /// divergent, which the design accepts (no wrapping transaction).
    #[allow(clippy::too_many_arguments)]
    async fn insert_copies(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        participants: &[Uuid],
        sender: Option<Uuid>,
        kind: MessageKind,
        content: &MessageContent,
        reply_to: Option<Uuid>,
        forwarded_from: Option<Uuid>,
        read_by: Uuid,
    ) -> AppResult<Vec<Message>> {
        let correlation_id = Uuid::new_v4();
        let now = Utc::now();

        let mut copies = Vec::with_capacity(participants.len());
        for owner in participants {
            let read_at = if *owner == read_by { Some(now) } else { None };
            let message = Message {
                id: Uuid::new_v4(),
                correlation_id,
                conversation_id,
                owner_id: *owner,
                sender_id: sender,
                kind,
                text: content.text.clone(),
                image_url: content.image_url.clone(),
                track_id: content.track_id.clone(),
                reply_to,
                forwarded_from,
                read_at,
                created_at: now,
                edited_at: None,
            };

            sqlx::query(
                "INSERT INTO messages \
                 (id, correlation_id, conversation_id, owner_id, sender_id, kind, text, \
                  image_url, track_id, reply_to, forwarded_from, read_at, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(message.id)
            .bind(message.correlation_id)
            .bind(message.conversation_id)
            .bind(message.owner_id)
            .bind(message.sender_id)
            .bind(message.kind.as_db())
            .bind(&message.text)
            .bind(&message.image_url)
            .bind(&message.track_id)
            .bind(message.reply_to)
            .bind(message.forwarded_from)
            .bind(message.read_at)
            .bind(message.created_at)
            .execute(db)
            .await?;

            copies.push(message);
        }

        Ok(copies)
    }

    /// New activity: update the shared last-message pointer and revive the
    /// conversation for participants who had cleared it.
    async fn touch_conversation(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        last_message_id: Uuid,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE conversations SET last_message_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(last_message_id)
        .execute(db)
        .await?;
        sqlx::query(
            "UPDATE conversation_participants SET cleared = FALSE \
             WHERE conversation_id = $1 AND cleared",
        )
        .bind(conversation_id)
        .execute(db)
        .await?;
        Ok(())
    }

    async fn recompute_last_message(db: &Pool<Postgres>, conversation_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE conversations SET last_message_id = \
             (SELECT id FROM messages WHERE conversation_id = $1 \
              ORDER BY created_at DESC, id DESC LIMIT 1) \
             WHERE id = $1",
        )
        .bind(conversation_id)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Move pin entries off copies that are about to be deleted onto a
    /// surviving sibling copy, so the shared pin outlives a one-sided delete.
    async fn repoint_pins_for_copies(db: &Pool<Postgres>, copy_ids: &[Uuid]) -> AppResult<()> {
        sqlx::query(
            "UPDATE conversation_pinned_messages cpm SET message_id = s.id \
             FROM messages d \
             JOIN messages s ON s.correlation_id = d.correlation_id AND s.id <> d.id \
             WHERE cpm.message_id = d.id AND d.id = ANY($1)",
        )
        .bind(copy_ids)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Same, for every copy a user owns in a conversation (clear history).
    pub(crate) async fn repoint_pins(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        owner: Uuid,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE conversation_pinned_messages cpm SET message_id = s.id \
             FROM messages d \
             JOIN messages s ON s.correlation_id = d.correlation_id AND s.id <> d.id \
             WHERE cpm.conversation_id = $1 AND cpm.message_id = d.id AND d.owner_id = $2",
        )
        .bind(conversation_id)
        .bind(owner)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Reaction rows are keyed by correlation id; drop the ones whose last
    /// copy is gone.
    pub(crate) async fn sweep_orphaned_reactions(
        db: &Pool<Postgres>,
        correlation_ids: &[Uuid],
    ) -> AppResult<()> {
        if correlation_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "DELETE FROM message_reactions r WHERE r.message_uuid = ANY($1) \
             AND NOT EXISTS (SELECT 1 FROM messages m WHERE m.correlation_id = r.message_uuid)",
        )
        .bind(correlation_ids)
        .execute(db)
        .await?;
        Ok(())
    }
}
