//! Message storage test functions

use murmur_storage_traits::conversations::ConversationStorage;
use murmur_storage_traits::messages::error::MessageError;
use murmur_storage_traits::messages::types::DeliveryState;
use murmur_storage_traits::messages::{MAX_MESSAGE_LIMIT, MessageStorage, Pagination};
use murmur_storage_traits::outbox::OutboxStorage;
use murmur_storage_traits::{
    CanonicalId, ConversationId, MessageId, ProvisionalId, Timestamp, UserId,
};

use super::{create_test_conversation, create_test_message, create_test_pending_send};

/// Test basic message save and find functionality
pub fn test_save_and_find_message<S>(storage: S)
where
    S: ConversationStorage + MessageStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();

    let mut message = create_test_message("c1", "bob", "hello", 1_000);
    message.message_type = "image".to_string();
    message.image_url = Some("https://example.com/i.png".to_string());
    message.parent_id = Some(MessageId::new("parent"));
    storage.save_message(message.clone()).unwrap();

    let found = storage.find_message(&message.id).unwrap().unwrap();
    assert_eq!(found, message);

    assert!(
        storage
            .find_message(&MessageId::new("missing"))
            .unwrap()
            .is_none()
    );
}

/// Test the uniqueness backstop on message ids
pub fn test_duplicate_message_rejected<S>(storage: S)
where
    S: ConversationStorage + MessageStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();

    let message = create_test_message("c1", "bob", "hello", 1_000);
    storage.save_message(message.clone()).unwrap();

    let mut again = message.clone();
    again.content = "different".to_string();
    let result = storage.save_message(again);
    assert!(matches!(result, Err(MessageError::AlreadyExists)));

    let found = storage.find_message(&message.id).unwrap().unwrap();
    assert_eq!(found.content, "hello");
}

/// Test the uniqueness backstop on provisional ids
pub fn test_duplicate_provisional_id_rejected<S>(storage: S)
where
    S: ConversationStorage + MessageStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();

    let (pending, _) = create_test_pending_send("c1", "alice", "hi", 1_000);
    storage.save_message(pending.clone()).unwrap();

    let mut confirmed = create_test_message("c1", "alice", "hi", 1_000);
    confirmed.provisional_id = pending.provisional_id.clone();
    let result = storage.save_message(confirmed);
    assert!(matches!(result, Err(MessageError::AlreadyExists)));
}

/// Test that a message cannot be written before its conversation exists
pub fn test_message_requires_conversation<S>(storage: S)
where
    S: ConversationStorage + MessageStorage,
{
    let message = create_test_message("ghost", "bob", "hello", 1_000);
    let result = storage.save_message(message.clone());
    assert!(matches!(result, Err(MessageError::MissingConversation)));
    assert!(storage.find_message(&message.id).unwrap().is_none());
}

/// Test message content validation
pub fn test_message_content_too_long<S>(storage: S)
where
    S: ConversationStorage + MessageStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();
    let message = create_test_message("c1", "bob", &"x".repeat(64 * 1024 + 1), 1_000);
    let result = storage.save_message(message);
    assert!(matches!(result, Err(MessageError::InvalidParameters(_))));
}

/// Test relabeling a provisional row to its canonical id
pub fn test_relabel_message<S>(storage: S)
where
    S: ConversationStorage + MessageStorage + OutboxStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();

    let (pending, entry) = create_test_pending_send("c1", "alice", "hi there", 1_234);
    let provisional_id = entry.provisional_id.clone();
    storage.save_pending_send(pending.clone(), entry).unwrap();

    let canonical = CanonicalId::generate();
    let relabeled = storage
        .relabel_message(&provisional_id, &canonical, Timestamp::from_millis(1_500))
        .unwrap();

    assert_eq!(relabeled.id, MessageId::from(canonical));
    assert_eq!(relabeled.state, DeliveryState::Confirmed);
    assert_eq!(relabeled.content, "hi there");
    assert_eq!(relabeled.created_at, Timestamp::from_millis(1_234));
    assert_eq!(relabeled.server_created_at, Some(Timestamp::from_millis(1_500)));
    assert_eq!(relabeled.provisional_id, Some(provisional_id.clone()));

    assert!(storage.find_message(&pending.id).unwrap().is_none());
    assert!(storage.find_outbox_entry(&provisional_id).unwrap().is_none());
    assert_eq!(
        storage
            .find_message_by_provisional_id(&provisional_id)
            .unwrap()
            .unwrap()
            .id,
        MessageId::from(canonical)
    );

    // Relabeling again is idempotent
    let again = storage
        .relabel_message(&provisional_id, &canonical, Timestamp::from_millis(1_500))
        .unwrap();
    assert_eq!(again, relabeled);

    let messages = storage.messages(&ConversationId::new("c1"), None).unwrap();
    assert_eq!(messages.len(), 1);
}

/// Test relabeling when the canonical row was already written by another path
pub fn test_relabel_message_canonical_exists<S>(storage: S)
where
    S: ConversationStorage + MessageStorage + OutboxStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();

    let (pending, entry) = create_test_pending_send("c1", "alice", "hi", 1_000);
    let provisional_id = entry.provisional_id.clone();
    storage.save_pending_send(pending, entry).unwrap();

    let echoed = create_test_message("c1", "alice", "hi", 1_100);
    let canonical = echoed.canonical_id().unwrap();
    storage.save_message(echoed.clone()).unwrap();

    let result = storage
        .relabel_message(&provisional_id, &canonical, Timestamp::from_millis(1_100))
        .unwrap();
    assert_eq!(result.id, echoed.id);
    assert_eq!(result.provisional_id, Some(provisional_id.clone()));

    let messages = storage.messages(&ConversationId::new("c1"), None).unwrap();
    assert_eq!(messages.len(), 1, "exactly one row must remain");
    assert!(storage.find_outbox_entry(&provisional_id).unwrap().is_none());
}

/// Test that a confirmed row is never re-keyed to a second canonical id
pub fn test_relabel_message_refuses_confirmed_row<S>(storage: S)
where
    S: ConversationStorage + MessageStorage + OutboxStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();

    let (pending, entry) = create_test_pending_send("c1", "alice", "twice", 1_000);
    let provisional_id = entry.provisional_id.clone();
    storage.save_pending_send(pending, entry).unwrap();

    let first = CanonicalId::generate();
    storage
        .relabel_message(&provisional_id, &first, Timestamp::from_millis(1_100))
        .unwrap();

    // A second server row carrying the same provisional id
    let second = create_test_message("c1", "alice", "twice", 1_200);
    let second_id = second.canonical_id().unwrap();
    let result =
        storage.relabel_message(&provisional_id, &second_id, Timestamp::from_millis(1_200));
    assert!(matches!(result, Err(MessageError::AlreadyConfirmed)));

    // Same refusal when the second row is already stored
    storage.save_message(second.clone()).unwrap();
    let result =
        storage.relabel_message(&provisional_id, &second_id, Timestamp::from_millis(1_200));
    assert!(matches!(result, Err(MessageError::AlreadyConfirmed)));

    let kept = storage.find_message(&MessageId::from(first)).unwrap().unwrap();
    assert_eq!(kept.provisional_id, Some(provisional_id));
    assert!(storage.find_message(&second.id).unwrap().is_some());
    let messages = storage.messages(&ConversationId::new("c1"), None).unwrap();
    assert_eq!(messages.len(), 2);
}

/// Test relabeling an unknown provisional id
pub fn test_relabel_message_not_found<S>(storage: S)
where
    S: ConversationStorage + MessageStorage,
{
    let result = storage.relabel_message(
        &ProvisionalId::generate(),
        &CanonicalId::generate(),
        Timestamp::from_millis(1),
    );
    assert!(matches!(result, Err(MessageError::NotFound)));
}

/// Test dedup signature lookup
pub fn test_find_unconfirmed_by_signature<S>(storage: S)
where
    S: ConversationStorage + MessageStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();

    let (early, _) = create_test_pending_send("c1", "alice", "same", 10_000);
    let (late, _) = create_test_pending_send("c1", "alice", "same", 19_000);
    let (other_text, _) = create_test_pending_send("c1", "alice", "other", 10_500);
    let (other_sender, _) = create_test_pending_send("c1", "bob", "same", 10_500);
    let confirmed = create_test_message("c1", "alice", "same", 10_200);
    for message in [&early, &late, &other_text, &other_sender, &confirmed] {
        storage.save_message(message.clone()).unwrap();
    }

    let found = storage
        .find_unconfirmed_by_signature(
            &ConversationId::new("c1"),
            &UserId::new("alice"),
            "same",
            Timestamp::from_millis(9_000),
            Timestamp::from_millis(20_000),
        )
        .unwrap();
    let ids: Vec<MessageId> = found.into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![early.id.clone(), late.id.clone()]);

    let found = storage
        .find_unconfirmed_by_signature(
            &ConversationId::new("c1"),
            &UserId::new("alice"),
            "same",
            Timestamp::from_millis(10_001),
            Timestamp::from_millis(18_999),
        )
        .unwrap();
    assert!(found.is_empty());
}

/// Test message listing order and pagination
pub fn test_messages_pagination<S>(storage: S)
where
    S: ConversationStorage + MessageStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();
    storage
        .save_conversation(create_test_conversation("c2"))
        .unwrap();

    for i in 0..10 {
        storage
            .save_message(create_test_message(
                "c1",
                "bob",
                &format!("m{i}"),
                1_000 + i * 10,
            ))
            .unwrap();
    }
    storage
        .save_message(create_test_message("c2", "bob", "elsewhere", 5_000))
        .unwrap();

    let conversation = ConversationId::new("c1");
    let all = storage.messages(&conversation, None).unwrap();
    assert_eq!(all.len(), 10);
    assert_eq!(all[0].content, "m9");
    assert_eq!(all[9].content, "m0");

    let page = storage
        .messages(&conversation, Some(Pagination::new(Some(3), Some(2))))
        .unwrap();
    let contents: Vec<&str> = page.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m7", "m6", "m5"]);

    let beyond = storage
        .messages(&conversation, Some(Pagination::new(Some(5), Some(50))))
        .unwrap();
    assert!(beyond.is_empty());

    let result = storage.messages(&conversation, Some(Pagination::new(Some(0), None)));
    assert!(matches!(result, Err(MessageError::InvalidParameters(_))));
    let result = storage.messages(
        &conversation,
        Some(Pagination::new(Some(MAX_MESSAGE_LIMIT + 1), None)),
    );
    assert!(matches!(result, Err(MessageError::InvalidParameters(_))));

    let latest = storage.latest_message(&conversation).unwrap().unwrap();
    assert_eq!(latest.content, "m9");
    assert!(
        storage
            .latest_message(&ConversationId::new("empty"))
            .unwrap()
            .is_none()
    );
}

/// Test the unread query
pub fn test_unread_after<S>(storage: S)
where
    S: ConversationStorage + MessageStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();

    let m1 = create_test_message("c1", "bob", "one", 1_000);
    let m2 = create_test_message("c1", "bob", "two", 2_000);
    let mine = create_test_message("c1", "me", "mine", 2_500);
    let m3 = create_test_message("c1", "carol", "three", 3_000);
    for message in [&m1, &m2, &mine, &m3] {
        storage.save_message(message.clone()).unwrap();
    }

    let conversation = ConversationId::new("c1");
    let me = UserId::new("me");

    let summary = storage
        .unread_after(&conversation, Timestamp::from_millis(1_000), &me)
        .unwrap();
    assert_eq!(summary.count, 2);
    assert_eq!(summary.first_unread, Some(m2.id.clone()));

    let summary = storage
        .unread_after(&conversation, Timestamp::from_millis(3_000), &me)
        .unwrap();
    assert_eq!(summary.count, 0);
    assert!(summary.first_unread.is_none());
}

/// Test delivery state updates and deletes
pub fn test_set_state_and_delete<S>(storage: S)
where
    S: ConversationStorage + MessageStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();
    let (pending, _) = create_test_pending_send("c1", "alice", "hi", 1_000);
    storage.save_message(pending.clone()).unwrap();

    storage
        .set_message_state(&pending.id, DeliveryState::Failed)
        .unwrap();
    assert_eq!(
        storage.find_message(&pending.id).unwrap().unwrap().state,
        DeliveryState::Failed
    );

    let result = storage.set_message_state(&MessageId::new("missing"), DeliveryState::Failed);
    assert!(matches!(result, Err(MessageError::NotFound)));

    assert!(storage.delete_message(&pending.id).unwrap());
    assert!(!storage.delete_message(&pending.id).unwrap());
    assert!(storage.find_message(&pending.id).unwrap().is_none());
}
