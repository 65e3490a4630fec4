//! External collaborator interfaces: the access policy gate and the user
//! directory. The core consults these; it never implements friendship,
//! blacklist, or profile logic itself.

use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    Message,
    React,
    DeleteForEveryone,
}

impl PolicyAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyAction::Message => "message",
            PolicyAction::React => "react",
            PolicyAction::DeleteForEveryone => "delete_for_everyone",
        }
    }
}

#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// May `actor` perform `action` against `target`?
    async fn is_allowed(&self, action: PolicyAction, actor: Uuid, target: Uuid)
        -> AppResult<bool>;

    /// Has either side blocked the other?
    async fn is_blocked(&self, a: Uuid, b: Uuid) -> AppResult<bool>;

    /// Add `target` to `actor`'s blacklist (used by clear-history's
    /// "delete and block" option).
    async fn block(&self, actor: Uuid, target: Uuid) -> AppResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    /// Already privacy-filtered for the requesting context by the upstream
    /// service; `None` means hidden or unset.
    pub avatar_url: Option<String>,
    pub premium: bool,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn profile(&self, user: Uuid) -> AppResult<UserProfile>;
}

/// Permissive gate for local runs and tests: everything is allowed, nobody is
/// blocked, block() is a no-op.
pub struct Unrestricted;

#[async_trait]
impl AccessPolicy for Unrestricted {
    async fn is_allowed(
        &self,
        _action: PolicyAction,
        _actor: Uuid,
        _target: Uuid,
    ) -> AppResult<bool> {
        Ok(true)
    }

    async fn is_blocked(&self, _a: Uuid, _b: Uuid) -> AppResult<bool> {
        Ok(false)
    }

    async fn block(&self, _actor: Uuid, _target: Uuid) -> AppResult<()> {
        Ok(())
    }
}

/// Directory that synthesizes a profile from the user id. Used for local runs
/// and as a test double; `premium` applies to every user it serves.
pub struct StaticDirectory {
    pub premium: bool,
}

impl StaticDirectory {
    pub fn standard() -> Self {
        Self { premium: false }
    }

    pub fn premium() -> Self {
        Self { premium: true }
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn profile(&self, user: Uuid) -> AppResult<UserProfile> {
        let short = &user.to_string()[..8];
        Ok(UserProfile {
            id: user,
            username: format!("u_{short}"),
            avatar_url: None,
            premium: self.premium,
        })
    }
}
