//! Outbox module
//!
//! The outbox is the durable queue of messages sent from this device that the
//! remote authority has not confirmed yet. Each entry points at a pending message
//! through its provisional id. Entries are removed on confirmed send and never on
//! failure; a failed attempt only pushes the next eligible attempt further out.

use crate::ids::{ProvisionalId, Timestamp};
use crate::messages::error::MessageError;
use crate::messages::types::Message;

pub mod types;

use self::types::*;

/// Storage traits for the outbox module
pub trait OutboxStorage {
    /// Insert a pending message and its outbox entry in one transaction.
    ///
    /// Either both rows are written or neither is.
    fn save_pending_send(&self, message: Message, entry: OutboxEntry) -> Result<(), MessageError>;

    /// Insert or replace an outbox entry for an existing message.
    ///
    /// Returns [`MessageError::NotFound`] if no message carries the entry's provisional id.
    fn save_outbox_entry(&self, entry: OutboxEntry) -> Result<(), MessageError>;

    /// Entries whose `next_attempt_at <= now`, oldest schedule first
    fn due_outbox_entries(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, MessageError>;

    /// Find an outbox entry
    fn find_outbox_entry(
        &self,
        provisional_id: &ProvisionalId,
    ) -> Result<Option<OutboxEntry>, MessageError>;

    /// Record a failed attempt: bumps `attempts`, stores the error and the next
    /// eligible attempt time, and returns the updated entry.
    ///
    /// Returns [`MessageError::NotFound`] if the entry no longer exists.
    fn record_send_failure(
        &self,
        provisional_id: &ProvisionalId,
        next_attempt_at: Timestamp,
        error: &str,
    ) -> Result<OutboxEntry, MessageError>;

    /// Remove an entry. Returns whether one was removed.
    fn remove_outbox_entry(&self, provisional_id: &ProvisionalId) -> Result<bool, MessageError>;

    /// All entries, oldest first
    fn outbox_entries(&self) -> Result<Vec<OutboxEntry>, MessageError>;
}
