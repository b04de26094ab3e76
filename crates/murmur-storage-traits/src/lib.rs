//! Murmur storage - storage provider traits and types for the local replica of
//! conversation state kept by the murmur sync engine.
//!
//! The local store holds five tables: conversations, users, members (with their
//! read watermarks), messages, and the outbox of not-yet-confirmed sends. Backends
//! must enforce the referential rules between them and the uniqueness of message
//! identifiers; the sync engine relies on those rules as its last line of defense
//! against duplicate rows.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

pub mod conversations;
pub mod error;
pub mod ids;
pub mod members;
pub mod messages;
pub mod outbox;
#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use error::StorageError;
pub use ids::{CanonicalId, ConversationId, IdError, MessageId, ProvisionalId, Timestamp, UserId};

use self::conversations::ConversationStorage;
use self::members::MemberStorage;
use self::messages::MessageStorage;
use self::outbox::OutboxStorage;

/// Backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Memory
    Memory,
    /// SQLite
    SQLite,
}

impl Backend {
    /// Check if it's a persistent backend
    ///
    /// All values different from [`Backend::Memory`] are considered persistent
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Self::Memory)
    }
}

/// Storage provider for the sync engine.
///
/// Implementors must provide:
/// - Conversation and user storage
/// - Member storage, including the per-member read watermark
/// - Message storage with uniqueness on both canonical and provisional ids
/// - Outbox storage for pending sends
pub trait SyncStorageProvider:
    ConversationStorage + MemberStorage + MessageStorage + OutboxStorage
{
    /// Returns the backend type.
    ///
    /// # Returns
    ///
    /// The storage backend type (e.g., [`Backend::Memory`] or [`Backend::SQLite`]).
    fn backend(&self) -> Backend;
}
