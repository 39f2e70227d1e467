use chrono::{Duration, TimeZone, Utc};
use shared::{
    domain::{UserId, UserSummary},
    protocol::DirectMessagePayload,
};

use super::*;

const ME: UserId = UserId(1);
const PEER: UserId = UserId(2);

fn user(id: UserId) -> UserSummary {
    UserSummary {
        id,
        name: format!("user-{}", id.0),
        avatar: None,
        is_online: None,
    }
}

fn dm(id: i64, sender: UserId, minute: i64) -> DirectMessagePayload {
    let receiver = if sender == ME { PEER } else { ME };
    DirectMessagePayload {
        id: MessageId(id),
        sender_id: sender,
        receiver_id: receiver,
        text: format!("message {id}"),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + Duration::minutes(minute),
        sender: user(sender),
    }
}

/// A server page: newest first.
fn page(ids: std::ops::RangeInclusive<i64>, has_more: bool) -> DirectMessagePage {
    DirectMessagePage {
        items: ids.rev().map(|id| dm(id, PEER, id)).collect(),
        has_more,
    }
}

fn loaded(first_page: DirectMessagePage) -> DirectThread {
    let mut thread = DirectThread::loading();
    thread.merge_first_page(first_page);
    thread
}

fn server_ids(thread: &DirectThread) -> Vec<i64> {
    thread
        .messages()
        .iter()
        .filter_map(|entry| entry.id.server_id())
        .map(|id| id.0)
        .collect()
}

fn assert_ascending(entries: &[MessageEntry]) {
    assert!(entries
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at));
}

#[test]
fn newest_first_pages_display_oldest_first() {
    let mut thread = loaded(page(21..=40, true));
    let requested = thread.begin_load_older().expect("older page available");
    assert_eq!(requested, 2);
    let inserted = thread.finish_load_older(requested, page(1..=20, false));

    assert_eq!(inserted, 20);
    assert_eq!(server_ids(&thread), (1..=40).collect::<Vec<_>>());
    assert_ascending(&thread.messages());
    assert!(!thread.has_more());
    assert_eq!(thread.begin_load_older(), None);
}

#[test]
fn concurrent_load_older_triggers_are_noops() {
    let mut thread = loaded(page(21..=40, true));
    assert_eq!(thread.begin_load_older(), Some(2));
    assert_eq!(thread.begin_load_older(), None);

    thread.abort_load_older();
    assert_eq!(thread.begin_load_older(), Some(2));
}

#[test]
fn older_page_overlapping_live_messages_is_deduplicated() {
    let mut thread = loaded(page(21..=40, true));
    // Two live messages shift the server's offsets by two.
    assert!(thread.prepend(MessageEntry::from(dm(41, PEER, 41))));
    assert!(thread.prepend(MessageEntry::from(dm(42, PEER, 42))));

    let requested = thread.begin_load_older().expect("older page");
    let inserted = thread.finish_load_older(requested, page(3..=22, true));

    assert_eq!(inserted, 18);
    assert_eq!(server_ids(&thread), (3..=42).collect::<Vec<_>>());
    assert_eq!(thread.len(), 40);
}

#[test]
fn out_of_sequence_page_is_dropped() {
    let mut thread = loaded(page(21..=40, true));
    thread.begin_load_older();
    assert_eq!(thread.finish_load_older(5, page(1..=20, false)), 0);
    assert!(thread.has_more());
    assert_eq!(thread.len(), 20);
}

#[test]
fn inbound_duplicate_is_ignored() {
    let mut thread = loaded(page(1..=3, false));
    assert!(!thread.prepend(MessageEntry::from(dm(3, PEER, 3))));
    assert_eq!(thread.len(), 3);
}

#[test]
fn confirmed_send_replaces_pending_entry_in_place() {
    let mut thread = loaded(page(1..=3, false));
    let local_id = Uuid::new_v4();
    thread.insert_pending(MessageEntry::pending(local_id, &user(ME), "hello"));
    assert!(thread.messages().last().expect("entry").is_pending());

    let mut confirmed = MessageEntry::from(dm(4, ME, 4));
    confirmed.text = "hello".into();
    assert_eq!(
        thread.confirm(local_id, confirmed),
        ConfirmOutcome::Replaced
    );

    let messages = thread.messages();
    assert_eq!(messages.len(), 4);
    let last = messages.last().expect("entry");
    assert_eq!(last.id, EntryId::Server(MessageId(4)));
    assert_eq!(last.delivery, DeliveryState::Confirmed);
}

#[test]
fn echo_before_confirmation_yields_exactly_one_entry() {
    let mut thread = loaded(page(1..=3, false));
    let local_id = Uuid::new_v4();
    thread.insert_pending(MessageEntry::pending(local_id, &user(ME), "hello"));

    // Echo lands before the mutation result: held, not displayed twice.
    assert!(!thread.receive_own_echo(MessageEntry::from(dm(4, ME, 4))));
    assert_eq!(thread.len(), 4);

    assert_eq!(
        thread.confirm(local_id, MessageEntry::from(dm(4, ME, 4))),
        ConfirmOutcome::Replaced
    );
    let ids: Vec<EntryId> = thread.messages().iter().map(|entry| entry.id).collect();
    assert_eq!(
        ids.iter()
            .filter(|id| **id == EntryId::Server(MessageId(4)))
            .count(),
        1
    );
    assert_eq!(thread.len(), 4);
}

#[test]
fn echo_after_confirmation_is_deduplicated() {
    let mut thread = loaded(page(1..=3, false));
    let local_id = Uuid::new_v4();
    thread.insert_pending(MessageEntry::pending(local_id, &user(ME), "hello"));
    thread.confirm(local_id, MessageEntry::from(dm(4, ME, 4)));

    assert!(!thread.receive_own_echo(MessageEntry::from(dm(4, ME, 4))));
    assert_eq!(thread.len(), 4);
}

#[test]
fn held_echo_from_another_device_is_released_once_sends_settle() {
    let mut thread = loaded(page(1..=3, false));
    let local_id = Uuid::new_v4();
    thread.insert_pending(MessageEntry::pending(local_id, &user(ME), "from here"));

    // Sent by the same account elsewhere; not the pending one.
    thread.receive_own_echo(MessageEntry::from(dm(4, ME, 4)));
    assert!(!thread.contains_server_id(MessageId(4)));

    let rejected = thread.reject(local_id, "offline").expect("pending entry");
    assert_eq!(
        rejected.delivery,
        DeliveryState::Failed {
            reason: "offline".into()
        }
    );
    assert!(thread.contains_server_id(MessageId(4)));
    assert_eq!(thread.len(), 4);
}

#[test]
fn rejected_send_restores_previous_id_set() {
    let mut thread = loaded(page(1..=3, false));
    let before: Vec<EntryId> = thread.messages().iter().map(|entry| entry.id).collect();

    let local_id = Uuid::new_v4();
    thread.insert_pending(MessageEntry::pending(local_id, &user(ME), "draft"));
    let rejected = thread.reject(local_id, "network down").expect("pending entry");

    assert_eq!(rejected.text, "draft");
    let after: Vec<EntryId> = thread.messages().iter().map(|entry| entry.id).collect();
    assert_eq!(before, after);
    assert!(thread.reject(local_id, "again").is_none());
}

#[test]
fn group_thread_appends_in_arrival_order_without_duplicates() {
    let history = vec![
        GroupMessagePayload {
            id: MessageId(2),
            board_id: BoardId(42),
            author_id: PEER,
            text: "second".into(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 2, 0).unwrap(),
            author: user(PEER),
        },
        GroupMessagePayload {
            id: MessageId(1),
            board_id: BoardId(42),
            author_id: ME,
            text: "first".into(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 1, 0).unwrap(),
            author: user(ME),
        },
    ];
    let mut thread = GroupThread::loading();
    assert_eq!(thread.merge_history(history.clone()), 2);
    assert!(!thread.is_loading());
    assert_eq!(thread.messages()[0].text, "first");

    let mut newer = history[0].clone();
    newer.id = MessageId(3);
    newer.created_at += Duration::minutes(5);
    assert!(thread.append(MessageEntry::from(newer)));
    assert!(!thread.append(MessageEntry::from(history[0].clone())));
    assert_eq!(thread.len(), 3);
    assert_ascending(thread.messages());
}

#[test]
fn cache_reports_empty_for_unknown_conversations() {
    let mut cache = ConversationCache::default();
    assert!(cache.messages(ConversationKey::Direct(PEER)).is_empty());
    cache.insert_direct(PEER, loaded(page(1..=2, false)));
    assert_eq!(cache.messages(ConversationKey::Direct(PEER)).len(), 2);
    cache.insert_group(BoardId(42), GroupThread::loading());
    let mut keys: Vec<ConversationKey> = cache.keys().collect();
    keys.sort_by_key(|key| matches!(key, ConversationKey::Group(_)));
    assert_eq!(
        keys,
        [ConversationKey::Direct(PEER), ConversationKey::Group(BoardId(42))]
    );
}

#[test]
fn live_message_during_first_load_is_kept() {
    let mut thread = DirectThread::loading();
    assert!(thread.is_loading());
    assert!(!thread.has_more());
    assert!(thread.prepend(MessageEntry::from(dm(41, PEER, 41))));

    assert_eq!(thread.merge_first_page(page(21..=40, true)), 20);
    assert!(!thread.is_loading());
    assert!(thread.has_more());
    assert_eq!(server_ids(&thread), (21..=41).collect::<Vec<_>>());
    assert_eq!(thread.begin_load_older(), Some(2));
}

#[test]
fn refetched_first_page_adds_only_missed_messages() {
    let mut thread = loaded(page(21..=40, false));
    let local_id = Uuid::new_v4();
    thread.insert_pending(MessageEntry::pending(local_id, &user(ME), "still sending"));

    assert_eq!(thread.merge_first_page(page(23..=42, true)), 2);
    assert_eq!(thread.len(), 23);
    assert!(thread.has_more());
    let messages = thread.messages();
    assert!(messages.iter().any(MessageEntry::is_pending));
    assert_eq!(server_ids(&thread), (21..=42).collect::<Vec<_>>());
}

#[test]
fn aborted_first_load_keeps_routed_messages() {
    let mut thread = DirectThread::loading();
    thread.prepend(MessageEntry::from(dm(7, PEER, 7)));
    thread.abort_loading();
    assert!(!thread.is_loading());
    assert_eq!(server_ids(&thread), [7]);
}

#[test]
fn group_history_merges_around_live_messages() {
    let mut thread = GroupThread::loading();
    let live = GroupMessagePayload {
        id: MessageId(9),
        board_id: BoardId(42),
        author_id: PEER,
        text: "live".into(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 9, 0).unwrap(),
        author: user(PEER),
    };
    let mut older = live.clone();
    older.id = MessageId(3);
    older.text = "older".into();
    older.created_at -= Duration::minutes(6);
    assert!(thread.append(MessageEntry::from(live.clone())));

    assert_eq!(thread.merge_history(vec![older, live]), 1);
    let texts: Vec<&str> = thread.messages().iter().map(|entry| entry.text.as_str()).collect();
    assert_eq!(texts, ["older", "live"]);
}

#[test]
fn scroll_anchor_preserves_visual_position() {
    let mut viewport = Viewport {
        scroll_top: 0.0,
        scroll_height: 1200.0,
        client_height: 400.0,
    };
    assert!(viewport.at_top());
    let anchor = viewport.anchor();

    // Twenty older rows of 30px were inserted above.
    anchor.restore(&mut viewport, 1800.0);
    assert_eq!(viewport.scroll_top, 600.0);
    assert_eq!(viewport.scroll_height, 1800.0);

    viewport.scroll_to_newest();
    assert_eq!(viewport.scroll_top, 1400.0);
}
