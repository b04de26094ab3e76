//! Member and watermark storage test functions

use murmur_storage_traits::conversations::ConversationStorage;
use murmur_storage_traits::members::MemberStorage;
use murmur_storage_traits::members::error::MemberError;
use murmur_storage_traits::members::types::{Member, MemberRole, Watermark};
use murmur_storage_traits::{ConversationId, MessageId, Timestamp, UserId};

use super::{create_test_conversation, create_test_user, seed_conversation};

fn watermark(at: i64, id: &str) -> Watermark {
    Watermark::new(Timestamp::from_millis(at), MessageId::new(id))
}

/// Test that a member cannot be written before its parents exist
pub fn test_member_requires_parents<S>(storage: S)
where
    S: ConversationStorage + MemberStorage,
{
    let member = Member::new(ConversationId::new("c1"), UserId::new("alice"));

    let result = storage.save_member(member.clone());
    assert!(matches!(
        result,
        Err(MemberError::MissingParent {
            conversation: true,
            user: true
        })
    ));

    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();
    let result = storage.save_member(member.clone());
    assert!(matches!(
        result,
        Err(MemberError::MissingParent {
            conversation: false,
            user: true
        })
    ));
    assert!(storage.members(&ConversationId::new("c1")).unwrap().is_empty());

    storage.save_user(create_test_user("alice")).unwrap();
    storage.save_member(member.clone()).unwrap();
    assert_eq!(
        storage
            .find_member(&member.conversation_id, &member.user_id)
            .unwrap(),
        Some(member)
    );
}

/// Test listing members and updating roles
pub fn test_members_listing<S>(storage: S)
where
    S: ConversationStorage + MemberStorage,
{
    seed_conversation(&storage, "c1", &["bob", "alice"]);
    seed_conversation(&storage, "c2", &["carol"]);

    let members = storage.members(&ConversationId::new("c1")).unwrap();
    let users: Vec<&str> = members.iter().map(|m| m.user_id.as_str()).collect();
    assert_eq!(users, vec!["alice", "bob"]);

    let mut admin = Member::new(ConversationId::new("c1"), UserId::new("bob"));
    admin.role = MemberRole::Admin;
    storage.save_member(admin).unwrap();

    let bob = storage
        .find_member(&ConversationId::new("c1"), &UserId::new("bob"))
        .unwrap()
        .unwrap();
    assert_eq!(bob.role, MemberRole::Admin);
    assert_eq!(storage.members(&ConversationId::new("c1")).unwrap().len(), 2);
}

/// Test that the watermark only ever moves forward
pub fn test_watermark_monotonic<S>(storage: S)
where
    S: ConversationStorage + MemberStorage,
{
    seed_conversation(&storage, "c1", &["alice"]);
    let conversation = ConversationId::new("c1");
    let user = UserId::new("alice");

    assert!(storage.watermark(&conversation, &user).unwrap().is_none());

    assert!(
        storage
            .advance_watermark(&conversation, &user, watermark(200, "m2"))
            .unwrap()
    );
    assert!(
        !storage
            .advance_watermark(&conversation, &user, watermark(100, "m1"))
            .unwrap(),
        "older watermark must not apply"
    );
    assert!(
        !storage
            .advance_watermark(&conversation, &user, watermark(200, "m2b"))
            .unwrap(),
        "equal watermark must not apply"
    );
    assert_eq!(
        storage.watermark(&conversation, &user).unwrap(),
        Some(watermark(200, "m2"))
    );

    assert!(
        storage
            .advance_watermark(&conversation, &user, watermark(300, "m3"))
            .unwrap()
    );
    assert_eq!(
        storage.watermark(&conversation, &user).unwrap(),
        Some(watermark(300, "m3"))
    );
}

/// Test that re-saving a member does not regress its watermark
pub fn test_save_member_keeps_newer_watermark<S>(storage: S)
where
    S: ConversationStorage + MemberStorage,
{
    seed_conversation(&storage, "c1", &["alice"]);
    let conversation = ConversationId::new("c1");
    let user = UserId::new("alice");

    storage
        .advance_watermark(&conversation, &user, watermark(500, "m5"))
        .unwrap();

    let mut stale = Member::new(conversation.clone(), user.clone());
    stale.last_read = Some(watermark(100, "m1"));
    storage.save_member(stale).unwrap();
    assert_eq!(
        storage.watermark(&conversation, &user).unwrap(),
        Some(watermark(500, "m5"))
    );

    let mut fresh = Member::new(conversation.clone(), user.clone());
    fresh.last_read = Some(watermark(900, "m9"));
    storage.save_member(fresh).unwrap();
    assert_eq!(
        storage.watermark(&conversation, &user).unwrap(),
        Some(watermark(900, "m9"))
    );

    let bare = Member::new(conversation.clone(), user.clone());
    storage.save_member(bare).unwrap();
    assert_eq!(
        storage.watermark(&conversation, &user).unwrap(),
        Some(watermark(900, "m9"))
    );
}

/// Test advancing the watermark of an unknown member
pub fn test_advance_watermark_missing_member<S>(storage: S)
where
    S: ConversationStorage + MemberStorage,
{
    let result = storage.advance_watermark(
        &ConversationId::new("c1"),
        &UserId::new("alice"),
        watermark(1, "m1"),
    );
    assert!(matches!(result, Err(MemberError::NotFound)));
}
