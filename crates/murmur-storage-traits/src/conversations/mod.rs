//! Conversations module
//!
//! This module is responsible for storing and retrieving conversations and the
//! users that take part in them.
//!
//! Conversations are created on first sync from the remote authority and are never
//! mutated by the sync engine afterwards, except for their last-sync watermark.

use crate::ids::{ConversationId, Timestamp, UserId};

pub mod error;
pub mod types;

use self::error::ConversationError;
use self::types::*;

/// Storage traits for the conversations module
pub trait ConversationStorage {
    /// Insert or update a conversation.
    ///
    /// On update the stored `last_synced_at` is kept; it only moves through
    /// [`ConversationStorage::set_last_synced_at`].
    fn save_conversation(&self, conversation: Conversation) -> Result<(), ConversationError>;

    /// Find a conversation by id
    fn find_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, ConversationError>;

    /// Get all conversations, ordered by id
    fn all_conversations(&self) -> Result<Vec<Conversation>, ConversationError>;

    /// Record when a conversation was last synced from the remote authority.
    ///
    /// Returns [`ConversationError::NotFound`] if the conversation does not exist.
    fn set_last_synced_at(
        &self,
        conversation_id: &ConversationId,
        synced_at: Timestamp,
    ) -> Result<(), ConversationError>;

    /// Insert or update a user
    fn save_user(&self, user: User) -> Result<(), ConversationError>;

    /// Find a user by id
    fn find_user(&self, user_id: &UserId) -> Result<Option<User>, ConversationError>;
}
