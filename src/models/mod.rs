pub mod conversation;
pub mod message;

pub use conversation::{participant_hash, Conversation, Participant, Wallpaper, WallpaperKind};
pub use message::{Message, MessageKind, Reaction};
