//! Outbox storage test functions

use murmur_storage_traits::conversations::ConversationStorage;
use murmur_storage_traits::messages::MessageStorage;
use murmur_storage_traits::messages::error::MessageError;
use murmur_storage_traits::outbox::OutboxStorage;
use murmur_storage_traits::outbox::types::OutboxEntry;
use murmur_storage_traits::{ConversationId, ProvisionalId, Timestamp};

use super::{create_test_conversation, create_test_pending_send};

/// Test that a pending send writes both rows
pub fn test_save_pending_send<S>(storage: S)
where
    S: ConversationStorage + MessageStorage + OutboxStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();

    let (message, entry) = create_test_pending_send("c1", "alice", "hi", 1_000);
    storage
        .save_pending_send(message.clone(), entry.clone())
        .unwrap();

    assert_eq!(storage.find_message(&message.id).unwrap(), Some(message));
    assert_eq!(
        storage.find_outbox_entry(&entry.provisional_id).unwrap(),
        Some(entry.clone())
    );
    assert_eq!(storage.outbox_entries().unwrap(), vec![entry]);
}

/// Test that a failed pending send leaves nothing behind
pub fn test_save_pending_send_is_atomic<S>(storage: S)
where
    S: ConversationStorage + MessageStorage + OutboxStorage,
{
    let (message, entry) = create_test_pending_send("ghost", "alice", "hi", 1_000);
    let result = storage.save_pending_send(message.clone(), entry.clone());
    assert!(matches!(result, Err(MessageError::MissingConversation)));
    assert!(storage.find_message(&message.id).unwrap().is_none());
    assert!(
        storage
            .find_outbox_entry(&entry.provisional_id)
            .unwrap()
            .is_none()
    );

    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();
    let (message, entry) = create_test_pending_send("c1", "alice", "hi", 1_000);
    storage.save_message(message.clone()).unwrap();

    // The message already exists, so the entry must not be written either
    let result = storage.save_pending_send(message, entry.clone());
    assert!(matches!(result, Err(MessageError::AlreadyExists)));
    assert!(
        storage
            .find_outbox_entry(&entry.provisional_id)
            .unwrap()
            .is_none()
    );
}

/// Test due entry selection and failure bookkeeping
pub fn test_due_entries_and_failures<S>(storage: S)
where
    S: ConversationStorage + MessageStorage + OutboxStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();

    let (m1, e1) = create_test_pending_send("c1", "alice", "one", 1_000);
    let (m2, e2) = create_test_pending_send("c1", "alice", "two", 2_000);
    storage.save_pending_send(m1, e1.clone()).unwrap();
    storage.save_pending_send(m2, e2.clone()).unwrap();

    let due = storage
        .due_outbox_entries(Timestamp::from_millis(1_500), 10)
        .unwrap();
    assert_eq!(due, vec![e1.clone()]);

    let updated = storage
        .record_send_failure(&e1.provisional_id, Timestamp::from_millis(9_000), "timeout")
        .unwrap();
    assert_eq!(updated.attempts, 1);
    assert_eq!(updated.next_attempt_at, Timestamp::from_millis(9_000));
    assert_eq!(updated.last_error.as_deref(), Some("timeout"));

    let due = storage
        .due_outbox_entries(Timestamp::from_millis(5_000), 10)
        .unwrap();
    assert_eq!(due, vec![e2.clone()]);

    let due = storage
        .due_outbox_entries(Timestamp::from_millis(10_000), 1)
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].provisional_id, e2.provisional_id);

    let result = storage.record_send_failure(
        &ProvisionalId::generate(),
        Timestamp::from_millis(1),
        "boom",
    );
    assert!(matches!(result, Err(MessageError::NotFound)));
}

/// Test removing and re-queueing entries
pub fn test_remove_and_requeue_entry<S>(storage: S)
where
    S: ConversationStorage + MessageStorage + OutboxStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();
    let (message, entry) = create_test_pending_send("c1", "alice", "hi", 1_000);
    storage.save_pending_send(message.clone(), entry.clone()).unwrap();

    assert!(storage.remove_outbox_entry(&entry.provisional_id).unwrap());
    assert!(!storage.remove_outbox_entry(&entry.provisional_id).unwrap());
    assert!(storage.outbox_entries().unwrap().is_empty());
    assert!(storage.find_message(&message.id).unwrap().is_some());

    let requeued = OutboxEntry::new(
        entry.provisional_id.clone(),
        ConversationId::new("c1"),
        Timestamp::from_millis(7_000),
    );
    storage.save_outbox_entry(requeued.clone()).unwrap();
    assert_eq!(
        storage.find_outbox_entry(&entry.provisional_id).unwrap(),
        Some(requeued)
    );

    let orphan = OutboxEntry::new(
        ProvisionalId::generate(),
        ConversationId::new("c1"),
        Timestamp::from_millis(7_000),
    );
    let result = storage.save_outbox_entry(orphan);
    assert!(matches!(result, Err(MessageError::NotFound)));
}

/// Test that deleting the message drops its outbox entry
pub fn test_delete_message_drops_entry<S>(storage: S)
where
    S: ConversationStorage + MessageStorage + OutboxStorage,
{
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();
    let (message, entry) = create_test_pending_send("c1", "alice", "hi", 1_000);
    storage.save_pending_send(message.clone(), entry.clone()).unwrap();

    assert!(storage.delete_message(&message.id).unwrap());
    assert!(
        storage
            .find_outbox_entry(&entry.provisional_id)
            .unwrap()
            .is_none()
    );
}
