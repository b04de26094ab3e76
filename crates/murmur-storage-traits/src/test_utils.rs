//! Fixture builders shared by backend and engine tests.

use crate::conversations::types::{Conversation, User};
use crate::ids::{CanonicalId, ConversationId, ProvisionalId, Timestamp, UserId};
use crate::members::types::Member;
use crate::messages::types::Message;
use crate::outbox::types::OutboxEntry;

/// A conversation with a generated name
pub fn create_test_conversation(id: &str) -> Conversation {
    Conversation::new(
        ConversationId::new(id),
        format!("Conversation {id}"),
        Timestamp::from_millis(1_000),
    )
}

/// A user whose display name mirrors its id
pub fn create_test_user(id: &str) -> User {
    User::new(UserId::new(id), format!("User {id}"))
}

/// A regular member without a watermark
pub fn create_test_member(conversation_id: &str, user_id: &str) -> Member {
    Member::new(ConversationId::new(conversation_id), UserId::new(user_id))
}

/// A confirmed message with a fresh canonical id
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

/// A pending message and its outbox entry, both keyed by a fresh provisional id
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
