//! Memory-based storage implementation of the ConversationStorage trait

use murmur_storage_traits::conversations::ConversationStorage;
use murmur_storage_traits::conversations::error::ConversationError;
use murmur_storage_traits::conversations::types::{Conversation, User};
use murmur_storage_traits::{ConversationId, Timestamp, UserId};

use crate::{
    MAX_CONVERSATION_NAME_LENGTH, MAX_DISPLAY_NAME_LENGTH, MurmurMemoryStorage,
    validate_string_length,
};

impl ConversationStorage for MurmurMemoryStorage {
    fn save_conversation(&self, conversation: Conversation) -> Result<(), ConversationError> {
        validate_string_length(
            &conversation.name,
            MAX_CONVERSATION_NAME_LENGTH,
            "Conversation name",
        )
        .map_err(ConversationError::InvalidParameters)?;

        let mut tables = self.inner.write();
        match tables.conversations.get_mut(&conversation.id) {
            Some(existing) => {
                let last_synced_at = existing.last_synced_at;
                *existing = conversation;
                existing.last_synced_at = last_synced_at;
            }
            None => {
                tables
                    .conversations
                    .insert(conversation.id.clone(), conversation);
            }
        }
        Ok(())
    }

    fn find_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, ConversationError> {
        Ok(self.inner.read().conversations.get(conversation_id).cloned())
    }

    fn all_conversations(&self) -> Result<Vec<Conversation>, ConversationError> {
        Ok(self.inner.read().conversations.values().cloned().collect())
    }

    fn set_last_synced_at(
        &self,
        conversation_id: &ConversationId,
        synced_at: Timestamp,
    ) -> Result<(), ConversationError> {
        let mut tables = self.inner.write();
        let conversation = tables
            .conversations
            .get_mut(conversation_id)
            .ok_or(ConversationError::NotFound)?;
        conversation.last_synced_at = Some(synced_at);
        Ok(())
    }

    fn save_user(&self, user: User) -> Result<(), ConversationError> {
        validate_string_length(&user.display_name, MAX_DISPLAY_NAME_LENGTH, "Display name")
            .map_err(ConversationError::InvalidParameters)?;

        self.inner.write().users.insert(user.id.clone(), user);
        Ok(())
    }

    fn find_user(&self, user_id: &UserId) -> Result<Option<User>, ConversationError> {
        Ok(self.inner.read().users.get(user_id).cloned())
    }
}
