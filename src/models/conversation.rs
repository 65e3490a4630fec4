use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

/// Canonical key for the participant set. Sorting makes the pair order
/// independent; dedup collapses a self-chat to a single id.
pub fn participant_hash(users: &[Uuid]) -> String {
    let mut ids: Vec<Uuid> = users.to_vec();
    ids.sort();
    ids.dedup();
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(":")
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_hash: String,
    pub last_message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WallpaperKind {
    Template,
    Color,
    Custom,
}

impl WallpaperKind {
    pub fn as_db(self) -> &'static str {
        match self {
            WallpaperKind::Template => "template",
            WallpaperKind::Color => "color",
            WallpaperKind::Custom => "custom",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "template" => Some(WallpaperKind::Template),
            "color" => Some(WallpaperKind::Color),
            "custom" => Some(WallpaperKind::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallpaper {
    pub kind: WallpaperKind,
    pub value: String,
}

impl Wallpaper {
    /// Label used in the "applied for both" announcement message.
    pub fn label(&self) -> String {
        match self.kind {
            WallpaperKind::Custom => "a custom wallpaper".to_string(),
            WallpaperKind::Template | WallpaperKind::Color => format!("\"{}\"", self.value),
        }
    }
}

/// One participant's row of per-user conversation state.
#[derive(Debug, Clone)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub muted: bool,
    pub archived: bool,
    pub pinned: bool,
    pub pinned_at: Option<DateTime<Utc>>,
    pub marked_unread: bool,
    pub cleared: bool,
    pub wallpaper: Option<Wallpaper>,
}

impl Participant {
    pub fn from_row(row: &PgRow) -> Self {
        let wallpaper_kind: Option<String> = row.get("wallpaper_kind");
        let wallpaper_value: Option<String> = row.get("wallpaper_value");
        let wallpaper = match (wallpaper_kind, wallpaper_value) {
            (Some(kind), Some(value)) => {
                WallpaperKind::from_db(&kind).map(|kind| Wallpaper { kind, value })
            }
            _ => None,
        };

        Self {
            conversation_id: row.get("conversation_id"),
            user_id: row.get("user_id"),
            muted: row.get("muted"),
            archived: row.get("archived"),
            pinned: row.get("pinned"),
            pinned_at: row.get("pinned_at"),
            marked_unread: row.get("marked_unread"),
            cleared: row.get("cleared"),
            wallpaper,
        }
    }
}
