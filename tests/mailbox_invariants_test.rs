// Mailbox fan-out invariants: per-owner duplication on send, shared-field
// consistency after edit and react, and the two deletion modes. Runs against
// the database named by DATABASE_URL; skips when none is reachable.

mod common;

use common::{text_content, try_pool, ScriptedPolicy};
use dm_service::error::AppError;
use dm_service::policy::Unrestricted;
use dm_service::services::mailbox_service::{MailboxService, MessageContent};
use sqlx::Row;
use uuid::Uuid;

#[tokio::test]
async fn send_creates_one_copy_per_participant() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let outcome = MailboxService::send(&pool, &Unrestricted, a, b, text_content("hi"), None)
        .await
        .unwrap();
    assert_eq!(outcome.copies.len(), 2);

    let correlation = outcome.copies[0].correlation_id;
    let rows = sqlx::query(
        "SELECT owner_id, sender_id, text, read_at FROM messages WHERE correlation_id = $1",
    )
    .bind(correlation)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(rows.len(), 2);

    let mut owners: Vec<Uuid> = rows.iter().map(|r| r.get("owner_id")).collect();
    owners.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(owners, expected);

    for row in &rows {
        assert_eq!(row.get::<Option<Uuid>, _>("sender_id"), Some(a));
        assert_eq!(row.get::<Option<String>, _>("text").as_deref(), Some("hi"));
        let owner: Uuid = row.get("owner_id");
        let read: Option<chrono::DateTime<chrono::Utc>> = row.get("read_at");
        // only the sender's own copy is born read
        assert_eq!(read.is_some(), owner == a);
    }
}

#[tokio::test]
async fn self_chat_send_creates_a_single_copy() {
    let Some(pool) = try_pool().await else { return };
    let me = Uuid::new_v4();

    let outcome = MailboxService::send(&pool, &Unrestricted, me, me, text_content("note"), None)
        .await
        .unwrap();
    assert_eq!(outcome.copies.len(), 1);
    assert_eq!(outcome.copies[0].owner_id, me);
    assert!(outcome.copies[0].read_at.is_some());
    assert_eq!(outcome.participants, vec![me]);
}

#[tokio::test]
async fn send_rejects_empty_content() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let err = MailboxService::send(
        &pool,
        &Unrestricted,
        a,
        b,
        MessageContent {
            text: Some("   ".into()),
            ..Default::default()
        },
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn send_is_rejected_when_policy_denies() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let policy = ScriptedPolicy::denying();

    let err = MailboxService::send(&pool, &policy, a, b, text_content("hi"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    // nothing was written
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE owner_id = $1 OR owner_id = $2")
            .bind(a)
            .bind(b)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn edit_fans_out_to_every_copy() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let sent = MailboxService::send(&pool, &Unrestricted, a, b, text_content("hi"), None)
        .await
        .unwrap();
    let own = sent.copies.iter().find(|c| c.owner_id == a).unwrap();

    let outcome = MailboxService::edit(&pool, own.id, a, "hello").await.unwrap();
    assert_eq!(outcome.text, "hello");

    let texts: Vec<Option<String>> =
        sqlx::query_scalar("SELECT text FROM messages WHERE correlation_id = $1")
            .bind(own.correlation_id)
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(texts.len(), 2);
    assert!(texts.iter().all(|t| t.as_deref() == Some("hello")));

    let stamped: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages WHERE correlation_id = $1 AND edited_at IS NOT NULL",
    )
    .bind(own.correlation_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(stamped, 2);
}

#[tokio::test]
async fn edit_is_author_only_and_needs_text() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let sent = MailboxService::send(&pool, &Unrestricted, a, b, text_content("hi"), None)
        .await
        .unwrap();
    let theirs = sent.copies.iter().find(|c| c.owner_id == b).unwrap();

    let err = MailboxService::edit(&pool, theirs.id, b, "hijacked")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let own = sent.copies.iter().find(|c| c.owner_id == a).unwrap();
    let err = MailboxService::edit(&pool, own.id, a, "  ").await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn react_toggles_and_stays_shared_across_copies() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let sent = MailboxService::send(&pool, &Unrestricted, a, b, text_content("hi"), None)
        .await
        .unwrap();
    let b_copy = sent.copies.iter().find(|c| c.owner_id == b).unwrap();
    let a_copy = sent.copies.iter().find(|c| c.owner_id == a).unwrap();

    // first reaction appends
    let outcome = MailboxService::react(&pool, &Unrestricted, b_copy.id, b, "👍")
        .await
        .unwrap();
    assert_eq!(outcome.reactions.len(), 1);
    assert_eq!(outcome.reactions[0].user_id, b);
    assert_eq!(outcome.reactions[0].emoji, "👍");

    // the list is the same no matter whose copy resolves it
    let via_a = MailboxService::reactions_for(&pool, a_copy.correlation_id)
        .await
        .unwrap();
    assert_eq!(via_a.len(), 1);
    assert_eq!(via_a[0].emoji, "👍");

    // a different emoji replaces
    let outcome = MailboxService::react(&pool, &Unrestricted, b_copy.id, b, "❤️")
        .await
        .unwrap();
    assert_eq!(outcome.reactions.len(), 1);
    assert_eq!(outcome.reactions[0].emoji, "❤️");

    // the same emoji removes
    let outcome = MailboxService::react(&pool, &Unrestricted, b_copy.id, b, "❤️")
        .await
        .unwrap();
    assert!(outcome.reactions.is_empty());
}

#[tokio::test]
async fn react_is_rejected_for_blocked_pairs() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let sent = MailboxService::send(&pool, &Unrestricted, a, b, text_content("hi"), None)
        .await
        .unwrap();
    let b_copy = sent.copies.iter().find(|c| c.owner_id == b).unwrap();

    let err = MailboxService::react(&pool, &ScriptedPolicy::denying(), b_copy.id, b, "👍")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
}

#[tokio::test]
async fn own_copy_delete_leaves_the_peer_copy() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let sent = MailboxService::send(&pool, &Unrestricted, a, b, text_content("hi"), None)
        .await
        .unwrap();
    let a_copy = sent.copies.iter().find(|c| c.owner_id == a).unwrap();
    let b_copy = sent.copies.iter().find(|c| c.owner_id == b).unwrap();

    let outcome = MailboxService::delete(&pool, &Unrestricted, &[a_copy.id], false, a)
        .await
        .unwrap();
    assert!(!outcome.for_everyone);
    assert_eq!(outcome.deleted, vec![a_copy.id]);

    assert!(MailboxService::get_copy(&pool, a_copy.id).await.is_err());
    let survivor = MailboxService::get_copy(&pool, b_copy.id).await.unwrap();
    assert_eq!(survivor.correlation_id, a_copy.correlation_id);
    assert_eq!(survivor.owner_id, b);
}

#[tokio::test]
async fn delete_for_everyone_removes_every_copy() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let sent = MailboxService::send(&pool, &Unrestricted, a, b, text_content("hi"), None)
        .await
        .unwrap();
    let a_copy = sent.copies.iter().find(|c| c.owner_id == a).unwrap();

    // a reaction rides along and must be swept with the copies
    MailboxService::react(&pool, &Unrestricted, a_copy.id, b, "👍")
        .await
        .unwrap();

    let outcome = MailboxService::delete(&pool, &Unrestricted, &[a_copy.id], true, a)
        .await
        .unwrap();
    assert!(outcome.for_everyone);
    assert_eq!(outcome.deleted, vec![a_copy.correlation_id]);

    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE correlation_id = $1")
            .bind(a_copy.correlation_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(remaining, 0);

    let reactions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM message_reactions WHERE message_uuid = $1")
            .bind(a_copy.correlation_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(reactions, 0);
}

#[tokio::test]
async fn delete_for_everyone_is_sender_only() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let sent = MailboxService::send(&pool, &Unrestricted, a, b, text_content("hi"), None)
        .await
        .unwrap();
    let b_copy = sent.copies.iter().find(|c| c.owner_id == b).unwrap();

    let err = MailboxService::delete(&pool, &Unrestricted, &[b_copy.id], true, b)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    // blocked pairs cannot delete-for-everyone either
    let a_copy = sent.copies.iter().find(|c| c.owner_id == a).unwrap();
    let err = MailboxService::delete(&pool, &ScriptedPolicy::denying(), &[a_copy.id], true, a)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
}

#[tokio::test]
async fn forward_mints_fresh_identity_without_reactions() {
    let Some(pool) = try_pool().await else { return };
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let sent = MailboxService::send(&pool, &Unrestricted, a, b, text_content("look"), None)
        .await
        .unwrap();
    let b_copy = sent.copies.iter().find(|c| c.owner_id == b).unwrap();
    MailboxService::react(&pool, &Unrestricted, b_copy.id, b, "👍")
        .await
        .unwrap();

    // B forwards A's message on to C
    let target = MailboxService::send(&pool, &Unrestricted, b, c, text_content("seed"), None)
        .await
        .unwrap()
        .conversation_id;
    let outcomes = MailboxService::forward(&pool, &Unrestricted, &[b_copy.id], &[target], b)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    let forwarded = &outcomes[0].copies;
    assert_eq!(forwarded.len(), 2);

    for copy in forwarded {
        assert_ne!(copy.correlation_id, b_copy.correlation_id);
        assert_eq!(copy.text.as_deref(), Some("look"));
        assert_eq!(copy.sender_id, Some(b));
        // attribution points at the original author
        assert_eq!(copy.forwarded_from, Some(a));
    }

    let carried: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM message_reactions WHERE message_uuid = $1")
            .bind(forwarded[0].correlation_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(carried, 0);
}

#[tokio::test]
async fn forwarding_own_message_drops_attribution() {
    let Some(pool) = try_pool().await else { return };
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let sent = MailboxService::send(&pool, &Unrestricted, a, b, text_content("mine"), None)
        .await
        .unwrap();
    let a_copy = sent.copies.iter().find(|c| c.owner_id == a).unwrap();

    let target = MailboxService::send(&pool, &Unrestricted, a, c, text_content("seed"), None)
        .await
        .unwrap()
        .conversation_id;
    let outcomes = MailboxService::forward(&pool, &Unrestricted, &[a_copy.id], &[target], a)
        .await
        .unwrap();
    assert!(outcomes[0].copies.iter().all(|c| c.forwarded_from.is_none()));
}

#[tokio::test]
async fn mark_read_stamps_unread_copies_only() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let sent = MailboxService::send(&pool, &Unrestricted, a, b, text_content("one"), None)
        .await
        .unwrap();
    MailboxService::send(&pool, &Unrestricted, a, b, text_content("two"), None)
        .await
        .unwrap();
    let conversation_id = sent.conversation_id;

    let outcome = MailboxService::mark_read(&pool, conversation_id, b).await.unwrap();
    assert_eq!(outcome.correlation_ids.len(), 2);
    assert_eq!(outcome.reader, b);

    // idempotent: nothing left to stamp
    let outcome = MailboxService::mark_read(&pool, conversation_id, b).await.unwrap();
    assert!(outcome.correlation_ids.is_empty());

    let unread: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages \
         WHERE conversation_id = $1 AND owner_id = $2 AND read_at IS NULL",
    )
    .bind(conversation_id)
    .bind(b)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(unread, 0);
}

#[tokio::test]
async fn send_revives_a_cleared_conversation() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let sent = MailboxService::send(&pool, &Unrestricted, a, b, text_content("hi"), None)
        .await
        .unwrap();
    let conversation_id = sent.conversation_id;

    sqlx::query(
        "UPDATE conversation_participants SET cleared = TRUE \
         WHERE conversation_id = $1 AND user_id = $2",
    )
    .bind(conversation_id)
    .bind(b)
    .execute(&pool)
    .await
    .unwrap();

    MailboxService::send(&pool, &Unrestricted, a, b, text_content("again"), None)
        .await
        .unwrap();

    let cleared: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM conversation_participants WHERE conversation_id = $1 AND cleared",
    )
    .bind(conversation_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(cleared, 0);
}
