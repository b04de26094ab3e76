//! Conversation and user storage test functions

use murmur_storage_traits::conversations::ConversationStorage;
use murmur_storage_traits::conversations::error::ConversationError;
use murmur_storage_traits::{ConversationId, Timestamp, UserId};

use super::{create_test_conversation, create_test_user};

/// Test basic conversation save and find functionality
pub fn test_save_and_find_conversation<S>(storage: S)
where
    S: ConversationStorage,
{
    let conversation = create_test_conversation("c1");
    storage.save_conversation(conversation.clone()).unwrap();

    let found = storage
        .find_conversation(&ConversationId::new("c1"))
        .unwrap()
        .unwrap();
    assert_eq!(found, conversation);

    let missing = storage
        .find_conversation(&ConversationId::new("nope"))
        .unwrap();
    assert!(missing.is_none());
}

/// Test that all conversations are listed ordered by id
pub fn test_all_conversations<S>(storage: S)
where
    S: ConversationStorage,
{
    assert!(storage.all_conversations().unwrap().is_empty());

    storage
        .save_conversation(create_test_conversation("c2"))
        .unwrap();
    storage
        .save_conversation(create_test_conversation("c1"))
        .unwrap();

    let ids: Vec<String> = storage
        .all_conversations()
        .unwrap()
        .into_iter()
        .map(|c| c.id.to_string())
        .collect();
    assert_eq!(ids, vec!["c1".to_string(), "c2".to_string()]);
}

/// Test that re-saving a conversation keeps its last sync time
pub fn test_upsert_preserves_last_synced_at<S>(storage: S)
where
    S: ConversationStorage,
{
    let conversation = create_test_conversation("c1");
    storage.save_conversation(conversation.clone()).unwrap();
    storage
        .set_last_synced_at(&conversation.id, Timestamp::from_millis(5_000))
        .unwrap();

    let mut renamed = conversation.clone();
    renamed.name = "Renamed".to_string();
    renamed.last_synced_at = None;
    storage.save_conversation(renamed).unwrap();

    let found = storage.find_conversation(&conversation.id).unwrap().unwrap();
    assert_eq!(found.name, "Renamed");
    assert_eq!(found.last_synced_at, Some(Timestamp::from_millis(5_000)));
}

/// Test setting last sync time of an unknown conversation
pub fn test_set_last_synced_at_missing<S>(storage: S)
where
    S: ConversationStorage,
{
    let result =
        storage.set_last_synced_at(&ConversationId::new("ghost"), Timestamp::from_millis(1));
    assert!(matches!(result, Err(ConversationError::NotFound)));
}

/// Test conversation name validation
pub fn test_conversation_name_too_long<S>(storage: S)
where
    S: ConversationStorage,
{
    let mut conversation = create_test_conversation("c1");
    conversation.name = "x".repeat(256);
    let result = storage.save_conversation(conversation);
    assert!(matches!(result, Err(ConversationError::InvalidParameters(_))));
}

/// Test user save, update and find
pub fn test_save_and_find_user<S>(storage: S)
where
    S: ConversationStorage,
{
    let user = create_test_user("alice");
    storage.save_user(user.clone()).unwrap();
    assert_eq!(
        storage.find_user(&UserId::new("alice")).unwrap(),
        Some(user.clone())
    );

    let mut updated = user;
    updated.display_name = "Alice A.".to_string();
    updated.avatar_url = Some("https://example.com/a.png".to_string());
    storage.save_user(updated.clone()).unwrap();
    assert_eq!(
        storage.find_user(&UserId::new("alice")).unwrap(),
        Some(updated)
    );

    assert!(storage.find_user(&UserId::new("bob")).unwrap().is_none());
}
