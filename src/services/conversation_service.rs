use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{participant_hash, Conversation, Message, Participant, Wallpaper};
use crate::policy::{AccessPolicy, UserDirectory};
use crate::services::mailbox_service::MailboxService;

/// Pinned-conversation quota per account tier, enforced on the transition
/// into the pinned state only.
pub const PIN_QUOTA_STANDARD: i64 = 4;
pub const PIN_QUOTA_PREMIUM: i64 = 8;

/// Cap on messages pinned inside a single conversation.
pub const MAX_PINNED_MESSAGES: i64 = 25;

pub fn pin_quota(premium: bool) -> i64 {
    if premium {
        PIN_QUOTA_PREMIUM
    } else {
        PIN_QUOTA_STANDARD
    }
}

pub struct MessagePinOutcome {
    pub pinned: bool,
    /// System-message copies announcing the change, one per participant.
    pub announcement: Vec<Message>,
    pub participants: Vec<Uuid>,
}

pub struct WallpaperOutcome {
    pub wallpaper: Option<Wallpaper>,
    pub applied_for_both: bool,
    pub announcement: Vec<Message>,
    pub participants: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearMode {
    SelfChat,
    OwnCopies,
    Everyone,
}

pub struct ClearOutcome {
    pub mode: ClearMode,
    pub participants: Vec<Uuid>,
    /// True once the conversation row itself is gone (for-everyone clear, or
    /// the last participant finishing their own clear).
    pub conversation_deleted: bool,
}

pub struct ConversationService;

impl ConversationService {
    /// Find or create the conversation for a participant pair.
    ///
    /// Keyed by the sorted pair so concurrent first-contact sends converge on
    /// one row. `a == b` yields the single-participant self-chat.
    pub async fn find_or_create(db: &Pool<Postgres>, a: Uuid, b: Uuid) -> AppResult<Conversation> {
        let hash = participant_hash(&[a, b]);

        let mut tx = db.begin().await?;
        sqlx::query(
            "INSERT INTO conversations (id, participant_hash) VALUES ($1, $2) \
             ON CONFLICT (participant_hash) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(&hash)
        .execute(&mut *tx)
        .await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, participant_hash, last_message_id, created_at, updated_at \
             FROM conversations WHERE participant_hash = $1",
        )
        .bind(&hash)
        .fetch_one(&mut *tx)
        .await?;

        let mut users = vec![a];
        if b != a {
            users.push(b);
        }
        for user in &users {
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id) \
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(conversation.id)
            .bind(user)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(conversation)
    }

    pub async fn get(db: &Pool<Postgres>, id: Uuid) -> AppResult<Conversation> {
        sqlx::query_as::<_, Conversation>(
            "SELECT id, participant_hash, last_message_id, created_at, updated_at \
             FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)
    }

    pub async fn participants(db: &Pool<Postgres>, conversation_id: Uuid) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM conversation_participants \
             WHERE conversation_id = $1 ORDER BY user_id",
        )
        .bind(conversation_id)
        .fetch_all(db)
        .await?;
        Ok(ids)
    }

    pub async fn participant(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<Participant>> {
        let row = sqlx::query(
            "SELECT conversation_id, user_id, muted, archived, pinned, pinned_at, \
                    marked_unread, cleared, wallpaper_kind, wallpaper_value \
             FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(db)
        .await?;
        Ok(row.as_ref().map(Participant::from_row))
    }

    /// Participant lookup with the error taxonomy applied: an existing
    /// conversation the actor is not part of is `Forbidden`, a missing
    /// conversation is `NotFound`.
    pub async fn require_participant(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Participant> {
        if let Some(participant) = Self::participant(db, conversation_id, user_id).await? {
            return Ok(participant);
        }
        let exists = sqlx::query_scalar::<_, i32>("SELECT 1 FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .fetch_optional(db)
            .await?;
        if exists.is_some() {
            Err(AppError::Forbidden)
        } else {
            Err(AppError::NotFound)
        }
    }

    /// Toggle the conversation's membership in the actor's pinned list.
    ///
    /// Private per-user state: no system message. The quota is checked only
    /// when entering the pinned state. Returns whether the conversation is
    /// pinned after the call.
    pub async fn toggle_list_pin(
        db: &Pool<Postgres>,
        directory: &dyn UserDirectory,
        conversation_id: Uuid,
        actor: Uuid,
    ) -> AppResult<bool> {
        let participant = Self::require_participant(db, conversation_id, actor).await?;

        if participant.pinned {
            sqlx::query(
                "UPDATE conversation_participants SET pinned = FALSE, pinned_at = NULL \
                 WHERE conversation_id = $1 AND user_id = $2",
            )
            .bind(conversation_id)
            .bind(actor)
            .execute(db)
            .await?;
            return Ok(false);
        }

        if participant.archived {
            return Err(AppError::BadRequest(
                "archived conversations cannot be pinned".into(),
            ));
        }

        let profile = directory.profile(actor).await?;
        let quota = pin_quota(profile.premium);
        let pinned_count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM conversation_participants WHERE user_id = $1 AND pinned",
        )
        .bind(actor)
        .fetch_one(db)
        .await?;
        if pinned_count >= quota {
            return Err(AppError::BadRequest(format!(
                "pin limit reached ({quota})"
            )));
        }

        sqlx::query(
            "UPDATE conversation_participants SET pinned = TRUE, pinned_at = NOW() \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(actor)
        .execute(db)
        .await?;
        Ok(true)
    }

    /// Toggle mute. Returns whether the conversation is muted afterwards.
    pub async fn toggle_mute(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        actor: Uuid,
    ) -> AppResult<bool> {
        let participant = Self::require_participant(db, conversation_id, actor).await?;
        let muted = !participant.muted;
        sqlx::query(
            "UPDATE conversation_participants SET muted = $3 \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(actor)
        .bind(muted)
        .execute(db)
        .await?;
        Ok(muted)
    }

    /// Toggle archive. Entering the archived state also drops the
    /// conversation from the actor's pinned list.
    pub async fn toggle_archive(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        actor: Uuid,
    ) -> AppResult<bool> {
        let participant = Self::require_participant(db, conversation_id, actor).await?;
        let archived = !participant.archived;
        if archived {
            sqlx::query(
                "UPDATE conversation_participants \
                 SET archived = TRUE, pinned = FALSE, pinned_at = NULL \
                 WHERE conversation_id = $1 AND user_id = $2",
            )
            .bind(conversation_id)
            .bind(actor)
            .execute(db)
            .await?;
        } else {
            sqlx::query(
                "UPDATE conversation_participants SET archived = FALSE \
                 WHERE conversation_id = $1 AND user_id = $2",
            )
            .bind(conversation_id)
            .bind(actor)
            .execute(db)
            .await?;
        }
        Ok(archived)
    }

    /// Toggle a message's membership in the conversation-level pinned set.
    ///
    /// The set stores one physical copy id per pinned logical message, so the
    /// toggle resolves through the correlation id: unpinning works no matter
    /// whose copy was recorded. A shared, announced state change, so it emits
    /// a system message to every participant.
    pub async fn toggle_message_pin(
        db: &Pool<Postgres>,
        directory: &dyn UserDirectory,
        conversation_id: Uuid,
        message_id: Uuid,
        actor: Uuid,
    ) -> AppResult<MessagePinOutcome> {
        Self::require_participant(db, conversation_id, actor).await?;

        let message = MailboxService::get_copy(db, message_id).await?;
        if message.conversation_id != conversation_id {
            return Err(AppError::NotFound);
        }

        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT cpm.message_id FROM conversation_pinned_messages cpm \
             JOIN messages m ON m.id = cpm.message_id \
             WHERE cpm.conversation_id = $1 AND m.correlation_id = $2",
        )
        .bind(conversation_id)
        .bind(message.correlation_id)
        .fetch_optional(db)
        .await?;

        let pinned = match existing {
            Some(pinned_copy) => {
                sqlx::query(
                    "DELETE FROM conversation_pinned_messages \
                     WHERE conversation_id = $1 AND message_id = $2",
                )
                .bind(conversation_id)
                .bind(pinned_copy)
                .execute(db)
                .await?;
                false
            }
            None => {
                let count = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM conversation_pinned_messages WHERE conversation_id = $1",
                )
                .bind(conversation_id)
                .fetch_one(db)
                .await?;
                if count >= MAX_PINNED_MESSAGES {
                    return Err(AppError::BadRequest(format!(
                        "pinned message limit reached ({MAX_PINNED_MESSAGES})"
                    )));
                }
                sqlx::query(
                    "INSERT INTO conversation_pinned_messages \
                     (conversation_id, message_id, pinned_by) VALUES ($1, $2, $3)",
                )
                .bind(conversation_id)
                .bind(message.id)
                .bind(actor)
                .execute(db)
                .await?;
                true
            }
        };

        let profile = directory.profile(actor).await?;
        let verb = if pinned { "pinned" } else { "unpinned" };
        let text = format!(
            "{} {} a message: {}",
            profile.username,
            verb,
            message.snippet(40)
        );
        let participants = Self::participants(db, conversation_id).await?;
        let announcement =
            MailboxService::record_system_message(db, conversation_id, &participants, actor, &text)
                .await?;

        Ok(MessagePinOutcome {
            pinned,
            announcement,
            participants,
        })
    }

    /// Set the wallpaper for the actor, or for every participant at once.
    /// The apply-for-both path is an announced, shared change.
    pub async fn set_wallpaper(
        db: &Pool<Postgres>,
        directory: &dyn UserDirectory,
        conversation_id: Uuid,
        actor: Uuid,
        wallpaper: Wallpaper,
        apply_for_both: bool,
    ) -> AppResult<WallpaperOutcome> {
        if wallpaper.value.trim().is_empty() {
            return Err(AppError::BadRequest("wallpaper value cannot be empty".into()));
        }
        Self::require_participant(db, conversation_id, actor).await?;
        let participants = Self::participants(db, conversation_id).await?;

        if apply_for_both && participants.len() > 1 {
            sqlx::query(
                "UPDATE conversation_participants SET wallpaper_kind = $2, wallpaper_value = $3 \
                 WHERE conversation_id = $1",
            )
            .bind(conversation_id)
            .bind(wallpaper.kind.as_db())
            .bind(&wallpaper.value)
            .execute(db)
            .await?;

            let profile = directory.profile(actor).await?;
            let text = format!("{} set the wallpaper to {}", profile.username, wallpaper.label());
            let announcement = MailboxService::record_system_message(
                db,
                conversation_id,
                &participants,
                actor,
                &text,
            )
            .await?;

            return Ok(WallpaperOutcome {
                wallpaper: Some(wallpaper),
                applied_for_both: true,
                announcement,
                participants,
            });
        }

        sqlx::query(
            "UPDATE conversation_participants SET wallpaper_kind = $3, wallpaper_value = $4 \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(actor)
        .bind(wallpaper.kind.as_db())
        .bind(&wallpaper.value)
        .execute(db)
        .await?;

        Ok(WallpaperOutcome {
            wallpaper: Some(wallpaper),
            applied_for_both: false,
            announcement: Vec::new(),
            participants,
        })
    }

    /// Reset the actor's wallpaper back to the default.
    pub async fn reset_wallpaper(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        actor: Uuid,
    ) -> AppResult<()> {
        Self::require_participant(db, conversation_id, actor).await?;
        sqlx::query(
            "UPDATE conversation_participants SET wallpaper_kind = NULL, wallpaper_value = NULL \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(actor)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Flag the conversation unread for the actor. Independent of per-copy
    /// read state; cleared by the next mark-read.
    pub async fn mark_unread(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        actor: Uuid,
    ) -> AppResult<()> {
        Self::require_participant(db, conversation_id, actor).await?;
        sqlx::query(
            "UPDATE conversation_participants SET marked_unread = TRUE \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(actor)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Clear history.
    ///
    /// Self-chat: wipes the single mailbox, the conversation row stays.
    /// Two-party, own copies only: deletes the actor's copies and marks the
    /// actor cleared; once every participant has cleared, the conversation is
    /// hard-deleted. For everyone: deletes everything immediately, optionally
    /// blocking the peer through the policy gate.
    pub async fn clear_history(
        db: &Pool<Postgres>,
        policy: &dyn AccessPolicy,
        conversation_id: Uuid,
        actor: Uuid,
        for_everyone: bool,
        block_peer: bool,
    ) -> AppResult<ClearOutcome> {
        Self::require_participant(db, conversation_id, actor).await?;
        let participants = Self::participants(db, conversation_id).await?;

        if participants.len() <= 1 {
            sqlx::query(
                "DELETE FROM message_reactions WHERE message_uuid IN \
                 (SELECT correlation_id FROM messages WHERE conversation_id = $1)",
            )
            .bind(conversation_id)
            .execute(db)
            .await?;
            sqlx::query("DELETE FROM messages WHERE conversation_id = $1")
                .bind(conversation_id)
                .execute(db)
                .await?;
            sqlx::query(
                "UPDATE conversations SET last_message_id = NULL, updated_at = NOW() WHERE id = $1",
            )
            .bind(conversation_id)
            .execute(db)
            .await?;
            return Ok(ClearOutcome {
                mode: ClearMode::SelfChat,
                participants,
                conversation_deleted: false,
            });
        }

        let peer = participants.iter().copied().find(|u| *u != actor);

        if for_everyone {
            sqlx::query(
                "DELETE FROM message_reactions WHERE message_uuid IN \
                 (SELECT correlation_id FROM messages WHERE conversation_id = $1)",
            )
            .bind(conversation_id)
            .execute(db)
            .await?;
            // participants, messages and pins go with the conversation row
            sqlx::query("DELETE FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .execute(db)
                .await?;

            if block_peer {
                if let Some(peer) = peer {
                    policy.block(actor, peer).await?;
                }
            }

            return Ok(ClearOutcome {
                mode: ClearMode::Everyone,
                participants,
                conversation_deleted: true,
            });
        }

        // Correlations still present before the actor's copies go; used for
        // orphaned-reaction cleanup afterwards.
        let correlations = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT correlation_id FROM messages WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_all(db)
        .await?;

        MailboxService::repoint_pins(db, conversation_id, actor).await?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = $1 AND owner_id = $2")
            .bind(conversation_id)
            .bind(actor)
            .execute(db)
            .await?;
        MailboxService::sweep_orphaned_reactions(db, &correlations).await?;

        sqlx::query(
            "UPDATE conversation_participants SET cleared = TRUE \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(actor)
        .execute(db)
        .await?;

        let all_cleared = sqlx::query_scalar::<_, bool>(
            "SELECT BOOL_AND(cleared) FROM conversation_participants WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_one(db)
        .await?;

        if all_cleared {
            sqlx::query("DELETE FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .execute(db)
                .await?;
        } else {
            sqlx::query(
                "UPDATE conversations SET last_message_id = \
                 (SELECT id FROM messages WHERE conversation_id = $1 \
                  ORDER BY created_at DESC, id DESC LIMIT 1) \
                 WHERE id = $1",
            )
            .bind(conversation_id)
            .execute(db)
            .await?;
        }

        Ok(ClearOutcome {
            mode: ClearMode::OwnCopies,
            participants,
            conversation_deleted: all_cleared,
        })
    }
}
