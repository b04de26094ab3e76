//! Messages module
//!
//! This module is responsible for storing and retrieving messages.
//!
//! Every message row is keyed by a [`MessageId`]: the provisional id while the
//! message is pending on this device, the canonical id once the remote authority
//! has accepted it. Backends must reject a second row with the same id or the same
//! provisional id with [`MessageError::AlreadyExists`]; the delivery path treats that
//! as "someone else already wrote it".

use crate::ids::{CanonicalId, ConversationId, MessageId, ProvisionalId, Timestamp, UserId};

pub mod error;
pub mod types;

use self::error::MessageError;
use self::types::*;

/// Default limit for messages queries to prevent unbounded memory usage
pub const DEFAULT_MESSAGE_LIMIT: usize = 1000;

/// Maximum allowed limit for messages queries to prevent resource exhaustion
pub const MAX_MESSAGE_LIMIT: usize = 10000;

/// Pagination parameters for querying messages
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    /// Maximum number of messages to return
    pub limit: Option<usize>,
    /// Number of messages to skip
    pub offset: Option<usize>,
}

impl Pagination {
    /// Create a new Pagination with specified limit and offset
    pub fn new(limit: Option<usize>, offset: Option<usize>) -> Self {
        Self { limit, offset }
    }

    /// Get the limit value, using default if not specified
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_MESSAGE_LIMIT)
    }

    /// Get the offset value, using 0 if not specified
    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    /// Check the limit against [`MAX_MESSAGE_LIMIT`]
    pub fn validate(&self) -> Result<(), MessageError> {
        let limit = self.limit();
        if !(1..=MAX_MESSAGE_LIMIT).contains(&limit) {
            return Err(MessageError::InvalidParameters(format!(
                "Limit must be between 1 and {}, got {}",
                MAX_MESSAGE_LIMIT, limit
            )));
        }
        Ok(())
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: Some(DEFAULT_MESSAGE_LIMIT),
            offset: Some(0),
        }
    }
}

/// Storage traits for the messages module
pub trait MessageStorage {
    /// Insert a new message.
    ///
    /// Errors:
    /// - [`MessageError::AlreadyExists`] if a row with the same id or provisional id exists
    /// - [`MessageError::MissingConversation`] if the conversation row does not exist
    fn save_message(&self, message: Message) -> Result<(), MessageError>;

    /// Find a message by its row key
    fn find_message(&self, message_id: &MessageId) -> Result<Option<Message>, MessageError>;

    /// Find a message by the provisional id it was sent with, whatever its current key
    fn find_message_by_provisional_id(
        &self,
        provisional_id: &ProvisionalId,
    ) -> Result<Option<Message>, MessageError>;

    /// Pending or failed messages matching a dedup signature.
    ///
    /// Matches `sender_id` and `content` exactly with `from <= created_at <= to`,
    /// ordered by `created_at` ascending.
    fn find_unconfirmed_by_signature(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<Message>, MessageError>;

    /// Re-key a provisional row to its canonical id and mark it confirmed.
    ///
    /// `content` and `created_at` are left untouched. If a row keyed by the canonical
    /// id already exists, the provisional row is removed and the canonical row is
    /// returned instead. Any outbox entry for the provisional id is removed.
    /// Returns [`MessageError::NotFound`] when neither row exists, and
    /// [`MessageError::AlreadyConfirmed`] when the row holding the provisional id is
    /// already confirmed under a different canonical id. Nothing is changed then.
    fn relabel_message(
        &self,
        provisional_id: &ProvisionalId,
        canonical_id: &CanonicalId,
        server_created_at: Timestamp,
    ) -> Result<Message, MessageError>;

    /// Update the delivery state of a message
    fn set_message_state(
        &self,
        message_id: &MessageId,
        state: DeliveryState,
    ) -> Result<(), MessageError>;

    /// Get messages of a conversation, newest first.
    ///
    /// Ordered by `created_at DESC, id DESC`. `None` uses [`Pagination::default`].
    /// Returns [`MessageError::InvalidParameters`] when the limit is 0 or above
    /// [`MAX_MESSAGE_LIMIT`].
    fn messages(
        &self,
        conversation_id: &ConversationId,
        pagination: Option<Pagination>,
    ) -> Result<Vec<Message>, MessageError>;

    /// Count messages created strictly after `after` that were not sent by
    /// `exclude_sender`, together with the oldest of them.
    fn unread_after(
        &self,
        conversation_id: &ConversationId,
        after: Timestamp,
        exclude_sender: &UserId,
    ) -> Result<UnreadSummary, MessageError>;

    /// The newest message of a conversation
    fn latest_message(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Message>, MessageError>;

    /// Delete a message (and any outbox entry for it). Returns whether a row was removed.
    fn delete_message(&self, message_id: &MessageId) -> Result<bool, MessageError>;
}
