use async_trait::async_trait;
use dm_service::error::AppResult;
use dm_service::policy::{AccessPolicy, PolicyAction};
use dm_service::services::mailbox_service::MessageContent;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Connect to the database named by DATABASE_URL and apply migrations.
/// Returns None (after saying why) when no database is reachable, so the
/// suite stays runnable on machines without Postgres.
#[allow(dead_code)]
pub async fn try_pool() -> Option<Pool<Postgres>> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set; skipping database-backed test");
            return None;
        }
    };

    let pool = match PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("database unreachable ({e}); skipping database-backed test");
            return None;
        }
    };

    if let Err(e) = dm_service::migrations::run_all(&pool).await {
        eprintln!("migrations failed ({e}); skipping database-backed test");
        return None;
    }

    Some(pool)
}

#[allow(dead_code)]
pub fn text_content(text: &str) -> MessageContent {
    MessageContent {
        text: Some(text.to_string()),
        ..Default::default()
    }
}

/// Access-policy double with fixed answers and a record of block() calls.
#[allow(dead_code)]
pub struct ScriptedPolicy {
    pub allow: bool,
    pub blocked: bool,
    pub blocks: Mutex<Vec<(Uuid, Uuid)>>,
}

impl ScriptedPolicy {
    #[allow(dead_code)]
    pub fn permissive() -> Self {
        Self {
            allow: true,
            blocked: false,
            blocks: Mutex::new(Vec::new()),
        }
    }

    #[allow(dead_code)]
    pub fn denying() -> Self {
        Self {
            allow: false,
            blocked: true,
            blocks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AccessPolicy for ScriptedPolicy {
    async fn is_allowed(
        &self,
        _action: PolicyAction,
        _actor: Uuid,
        _target: Uuid,
    ) -> AppResult<bool> {
        Ok(self.allow)
    }

    async fn is_blocked(&self, _a: Uuid, _b: Uuid) -> AppResult<bool> {
        Ok(self.blocked)
    }

    async fn block(&self, actor: Uuid, target: Uuid) -> AppResult<()> {
        self.blocks.lock().unwrap().push((actor, target));
        Ok(())
    }
}
