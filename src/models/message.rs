use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    System,
}

impl MessageKind {
    pub fn as_db(self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::System => "system",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "user" => Some(MessageKind::User),
            "system" => Some(MessageKind::System),
            _ => None,
        }
    }
}

/// One mailbox copy of a logical message. Copies of the same logical message
/// share `correlation_id`; `owner_id` is the mailbox the copy lives in.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub correlation_id: Uuid,
    pub conversation_id: Uuid,
    pub owner_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub track_id: Option<String>,
    pub reply_to: Option<Uuid>,
    pub forwarded_from: Option<Uuid>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn from_row(row: &PgRow) -> Self {
        let kind: String = row.get("kind");
        Self {
            id: row.get("id"),
            correlation_id: row.get("correlation_id"),
            conversation_id: row.get("conversation_id"),
            owner_id: row.get("owner_id"),
            sender_id: row.get("sender_id"),
            kind: MessageKind::from_db(&kind).unwrap_or(MessageKind::User),
            text: row.get("text"),
            image_url: row.get("image_url"),
            track_id: row.get("track_id"),
            reply_to: row.get("reply_to"),
            forwarded_from: row.get("forwarded_from"),
            read_at: row.get("read_at"),
            created_at: row.get("created_at"),
            edited_at: row.get("edited_at"),
        }
    }

    /// Short preview used in pin announcements and list previews.
    pub fn snippet(&self, max_chars: usize) -> String {
        if let Some(text) = self.text.as_deref().filter(|t| !t.trim().is_empty()) {
            let mut out: String = text.chars().take(max_chars).collect();
            if text.chars().count() > max_chars {
                out.push('…');
            }
            out
        } else if self.image_url.is_some() {
            "a photo".to_string()
        } else if self.track_id.is_some() {
            "a track".to_string()
        } else {
            "a message".to_string()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
}
