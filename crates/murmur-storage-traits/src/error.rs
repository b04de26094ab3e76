//! Error types for murmur storage operations

use thiserror::Error;

use crate::conversations::error::ConversationError;
use crate::members::error::MemberError;
use crate::messages::error::MessageError;

/// Umbrella error for callers that touch more than one table.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Conversation or user table error
    #[error(transparent)]
    Conversation(#[from] ConversationError),

    /// Member table error
    #[error(transparent)]
    Member(#[from] MemberError),

    /// Message or outbox table error
    #[error(transparent)]
    Message(#[from] MessageError),
}

impl StorageError {
    /// Whether the failure is a missing parent row, which callers treat as
    /// "retry later" rather than a hard error.
    pub fn is_missing_parent(&self) -> bool {
        matches!(
            self,
            Self::Member(MemberError::MissingParent { .. })
                | Self::Message(MessageError::MissingConversation)
        )
    }
}
