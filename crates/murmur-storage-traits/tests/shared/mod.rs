//! Shared test functions run against every storage backend

#![allow(dead_code)]

pub mod conversation_tests;
pub mod member_tests;
pub mod message_tests;
pub mod outbox_tests;

use murmur_storage_traits::conversations::ConversationStorage;
use murmur_storage_traits::conversations::types::{Conversation, User};
use murmur_storage_traits::members::MemberStorage;
use murmur_storage_traits::members::types::Member;
use murmur_storage_traits::messages::types::Message;
use murmur_storage_traits::outbox::types::OutboxEntry;
use murmur_storage_traits::{
    CanonicalId, ConversationId, ProvisionalId, Timestamp, UserId,
};

pub fn create_test_conversation(id: &str) -> Conversation {
    Conversation::new(
        ConversationId::new(id),
        format!("Conversation {id}"),
        Timestamp::from_millis(1_000),
    )
}

pub fn create_test_user(id: &str) -> User {
    User::new(UserId::new(id), format!("User {id}"))
}

pub fn create_test_message(
    conversation_id: &str,
    sender_id: &str,
    content: &str,
    created_at_millis: i64,
) -> Message {
    Message::confirmed(
        CanonicalId::generate(),
        ConversationId::new(conversation_id),
        UserId::new(sender_id),
        content,
        Timestamp::from_millis(created_at_millis),
    )
}

pub fn create_test_pending_send(
    conversation_id: &str,
    sender_id: &str,
    content: &str,
    created_at_millis: i64,
) -> (Message, OutboxEntry) {
    let provisional_id = ProvisionalId::generate();
    let created_at = Timestamp::from_millis(created_at_millis);
    let message = Message::pending(
        provisional_id.clone(),
        ConversationId::new(conversation_id),
        UserId::new(sender_id),
        content,
        created_at,
    );
    let entry = OutboxEntry::new(
        provisional_id,
        ConversationId::new(conversation_id),
        created_at,
    );
    (message, entry)
}

/// Seed a conversation with the given users as members
pub fn seed_conversation<S>(storage: &S, conversation_id: &str, user_ids: &[&str])
where
    S: ConversationStorage + MemberStorage,
{
    storage
        .save_conversation(create_test_conversation(conversation_id))
        .unwrap();
    for user_id in user_ids {
        storage.save_user(create_test_user(user_id)).unwrap();
        storage
            .save_member(Member::new(
                ConversationId::new(conversation_id),
                UserId::new(*user_id),
            ))
            .unwrap();
    }
}
