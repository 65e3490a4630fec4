// Viewer-scoped reads: conversation list ordering, unread accounting, page
// math, search, pinned previews, attachments, and stats. Everything a viewer
// sees must come out of their own mailbox.

mod common;

use chrono::{Duration, Utc};
use common::{text_content, try_pool};
use dm_service::policy::{StaticDirectory, Unrestricted};
use dm_service::services::conversation_service::ConversationService;
use dm_service::services::mailbox_service::{MailboxService, MessageContent};
use dm_service::services::view_service::{AttachmentKind, ViewService, PAGE_SIZE};
use uuid::Uuid;

#[tokio::test]
async fn unread_count_moves_only_for_the_recipient() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let directory = StaticDirectory::standard();

    let conversation = MailboxService::send(&pool, &Unrestricted, a, b, text_content("hi"), None)
        .await
        .unwrap()
        .conversation_id;

    let theirs = ViewService::conversation_view(&pool, &directory, conversation, b)
        .await
        .unwrap();
    assert_eq!(theirs.unread_count, 1);

    let mine = ViewService::conversation_view(&pool, &directory, conversation, a)
        .await
        .unwrap();
    assert_eq!(mine.unread_count, 0);

    MailboxService::mark_read(&pool, conversation, b).await.unwrap();
    let theirs = ViewService::conversation_view(&pool, &directory, conversation, b)
        .await
        .unwrap();
    assert_eq!(theirs.unread_count, 0);
}

#[tokio::test]
async fn list_orders_pinned_then_self_chat_then_recency() {
    let Some(pool) = try_pool().await else { return };
    let user = Uuid::new_v4();
    let directory = StaticDirectory::standard();

    let older = MailboxService::send(&pool, &Unrestricted, user, Uuid::new_v4(), text_content("older"), None)
        .await
        .unwrap()
        .conversation_id;
    let self_chat = MailboxService::send(&pool, &Unrestricted, user, user, text_content("note"), None)
        .await
        .unwrap()
        .conversation_id;
    let newer = MailboxService::send(&pool, &Unrestricted, user, Uuid::new_v4(), text_content("newer"), None)
        .await
        .unwrap()
        .conversation_id;
    let pinned = MailboxService::send(&pool, &Unrestricted, user, Uuid::new_v4(), text_content("pin me"), None)
        .await
        .unwrap()
        .conversation_id;
    ConversationService::toggle_list_pin(&pool, &directory, pinned, user)
        .await
        .unwrap();

    let list = ViewService::conversation_list(&pool, &directory, user)
        .await
        .unwrap();
    let ids: Vec<Uuid> = list.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![pinned, self_chat, newer, older]);

    let self_entry = list.iter().find(|v| v.id == self_chat).unwrap();
    assert!(self_entry.self_chat);
    assert_eq!(self_entry.peer.id, user);
}

#[tokio::test]
async fn last_message_is_resolved_per_viewer() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let directory = StaticDirectory::standard();

    let first = MailboxService::send(&pool, &Unrestricted, a, b, text_content("first"), None)
        .await
        .unwrap();
    let second = MailboxService::send(&pool, &Unrestricted, a, b, text_content("second"), None)
        .await
        .unwrap();
    let conversation = first.conversation_id;

    // A drops their own copy of the newest message
    let a_copy = second.copies.iter().find(|c| c.owner_id == a).unwrap();
    MailboxService::delete(&pool, &Unrestricted, &[a_copy.id], false, a)
        .await
        .unwrap();

    let mine = ViewService::conversation_view(&pool, &directory, conversation, a)
        .await
        .unwrap();
    assert_eq!(mine.last_message.unwrap().text.as_deref(), Some("first"));

    let theirs = ViewService::conversation_view(&pool, &directory, conversation, b)
        .await
        .unwrap();
    assert_eq!(theirs.last_message.unwrap().text.as_deref(), Some("second"));
}

#[tokio::test]
async fn pinned_previews_render_from_the_viewers_own_copy() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let directory = StaticDirectory::standard();

    let sent = MailboxService::send(&pool, &Unrestricted, a, b, text_content("keep this"), None)
        .await
        .unwrap();
    let conversation = sent.conversation_id;
    let a_copy = sent.copies.iter().find(|c| c.owner_id == a).unwrap();
    let b_copy = sent.copies.iter().find(|c| c.owner_id == b).unwrap();

    // the pin records A's physical copy
    ConversationService::toggle_message_pin(&pool, &directory, conversation, a_copy.id, a)
        .await
        .unwrap();

    let theirs = ViewService::conversation_view(&pool, &directory, conversation, b)
        .await
        .unwrap();
    assert_eq!(theirs.pinned_messages.len(), 1);
    // B still sees their own copy, not A's
    assert_eq!(theirs.pinned_messages[0].id, b_copy.id);
    assert_eq!(theirs.pinned_messages[0].correlation_id, a_copy.correlation_id);
}

#[tokio::test]
async fn pages_are_chronological_and_thirty_deep() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let mut conversation = None;
    for i in 0..35 {
        let outcome =
            MailboxService::send(&pool, &Unrestricted, a, b, text_content(&format!("m{i:02}")), None)
                .await
                .unwrap();
        conversation.get_or_insert(outcome.conversation_id);
    }
    let conversation = conversation.unwrap();

    let newest = ViewService::message_page(&pool, conversation, a, 0)
        .await
        .unwrap();
    assert_eq!(newest.len() as i64, PAGE_SIZE);
    assert_eq!(newest.first().unwrap().text.as_deref(), Some("m05"));
    assert_eq!(newest.last().unwrap().text.as_deref(), Some("m34"));

    let oldest = ViewService::message_page(&pool, conversation, a, 1)
        .await
        .unwrap();
    assert_eq!(oldest.len(), 5);
    assert_eq!(oldest.first().unwrap().text.as_deref(), Some("m00"));
    assert_eq!(oldest.last().unwrap().text.as_deref(), Some("m04"));
}

#[tokio::test]
async fn jump_math_counts_newer_messages_in_the_own_mailbox() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let before = Utc::now() - Duration::seconds(1);

    let mut first_correlation = None;
    let mut conversation = None;
    for i in 0..35 {
        let outcome =
            MailboxService::send(&pool, &Unrestricted, a, b, text_content(&format!("m{i}")), None)
                .await
                .unwrap();
        conversation.get_or_insert(outcome.conversation_id);
        first_correlation.get_or_insert(outcome.copies[0].correlation_id);
    }
    let conversation = conversation.unwrap();

    // 34 newer copies ahead of the first message: it lives on page 1
    let page = ViewService::jump_to_message(&pool, conversation, a, first_correlation.unwrap())
        .await
        .unwrap();
    assert_eq!(page, 1);

    // first message on/after a date before everything is the oldest one
    let page = ViewService::jump_to_date(&pool, conversation, a, before)
        .await
        .unwrap();
    assert_eq!(page, 1);

    // nothing after a date in the future
    assert!(
        ViewService::jump_to_date(&pool, conversation, a, Utc::now() + Duration::days(1))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn search_is_case_insensitive_literal_and_own_user_messages_only() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let directory = StaticDirectory::standard();

    let sent = MailboxService::send(&pool, &Unrestricted, a, b, text_content("Hello World"), None)
        .await
        .unwrap();
    let conversation = sent.conversation_id;
    MailboxService::send(&pool, &Unrestricted, b, a, text_content("hello back"), None)
        .await
        .unwrap();
    MailboxService::send(&pool, &Unrestricted, a, b, text_content("50% off"), None)
        .await
        .unwrap();
    MailboxService::send(&pool, &Unrestricted, a, b, text_content("half off"), None)
        .await
        .unwrap();

    let hits = ViewService::search(&pool, conversation, a, "hello")
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);

    // wildcards are matched literally
    let hits = ViewService::search(&pool, conversation, a, "50%")
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    // a system announcement mentions "pinned", but search never returns it
    let pin_target = sent.copies.iter().find(|c| c.owner_id == a).unwrap();
    ConversationService::toggle_message_pin(&pool, &directory, conversation, pin_target.id, a)
        .await
        .unwrap();
    let hits = ViewService::search(&pool, conversation, a, "pinned")
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn attachments_and_stats_are_viewer_scoped() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let sent = MailboxService::send(
        &pool,
        &Unrestricted,
        a,
        b,
        MessageContent {
            text: Some("look".into()),
            image_url: Some("https://cdn.example/p.jpg".into()),
            track_id: None,
        },
        None,
    )
    .await
    .unwrap();
    let conversation = sent.conversation_id;
    MailboxService::send(
        &pool,
        &Unrestricted,
        a,
        b,
        MessageContent {
            text: None,
            image_url: None,
            track_id: Some("track-9".into()),
        },
        None,
    )
    .await
    .unwrap();
    MailboxService::send(&pool, &Unrestricted, b, a, text_content("nice"), None)
        .await
        .unwrap();

    let a_copy = sent.copies.iter().find(|c| c.owner_id == a).unwrap();
    MailboxService::react(&pool, &Unrestricted, a_copy.id, b, "👍")
        .await
        .unwrap();

    let images = ViewService::attachments(&pool, conversation, a, AttachmentKind::Image, 0)
        .await
        .unwrap();
    assert_eq!(images.total, 1);
    assert_eq!(images.messages.len(), 1);
    assert_eq!(
        images.messages[0].image_url.as_deref(),
        Some("https://cdn.example/p.jpg")
    );

    let tracks = ViewService::attachments(&pool, conversation, a, AttachmentKind::Track, 0)
        .await
        .unwrap();
    assert_eq!(tracks.total, 1);
    assert_eq!(tracks.messages[0].track_id.as_deref(), Some("track-9"));

    let stats = ViewService::stats(&pool, conversation, a).await.unwrap();
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.received, 1);
    assert_eq!(stats.photos, 1);
    assert_eq!(stats.reactions, 1);
}

#[tokio::test]
async fn cleared_conversations_stay_out_of_the_list() {
    let Some(pool) = try_pool().await else { return };
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let directory = StaticDirectory::standard();

    let conversation = MailboxService::send(&pool, &Unrestricted, a, b, text_content("hi"), None)
        .await
        .unwrap()
        .conversation_id;

    ConversationService::clear_history(&pool, &Unrestricted, conversation, a, false, false)
        .await
        .unwrap();

    let mine = ViewService::conversation_list(&pool, &directory, a).await.unwrap();
    assert!(mine.iter().all(|v| v.id != conversation));

    let theirs = ViewService::conversation_list(&pool, &directory, b).await.unwrap();
    assert!(theirs.iter().any(|v| v.id == conversation));

    // a new message revives it for the side that cleared
    MailboxService::send(&pool, &Unrestricted, b, a, text_content("you there?"), None)
        .await
        .unwrap();
    let mine = ViewService::conversation_list(&pool, &directory, a).await.unwrap();
    assert!(mine.iter().any(|v| v.id == conversation));
}
