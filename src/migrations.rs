use sqlx::{Pool, Postgres};

// Embed SQL migrations at compile time for deterministic startup
const MIG_0001: &str = include_str!("../migrations/0001_create_conversations.sql");
const MIG_0002: &str = include_str!("../migrations/0002_create_conversation_participants.sql");
const MIG_0003: &str = include_str!("../migrations/0003_create_messages.sql");
const MIG_0004: &str = include_str!("../migrations/0004_create_message_reactions.sql");
const MIG_0005: &str = include_str!("../migrations/0005_create_conversation_pinned_messages.sql");

/// Apply all migrations in order. Every statement is IF NOT EXISTS, so
/// reruns are no-ops and a failure is a real schema problem.
pub async fn run_all(db: &Pool<Postgres>) -> Result<(), sqlx::Error> {
    for (label, sql) in [
        ("0001", MIG_0001),
        ("0002", MIG_0002),
        ("0003", MIG_0003),
        ("0004", MIG_0004),
        ("0005", MIG_0005),
    ] {
        sqlx::raw_sql(sql).execute(db).await?;
        tracing::debug!(migration = label, "migration applied");
    }
    Ok(())
}
