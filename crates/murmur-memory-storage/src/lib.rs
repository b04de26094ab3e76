//! Memory-based storage implementation for the murmur sync engine.
//!
//! This crate implements the [`SyncStorageProvider`] trait entirely in memory.
//! It is non-persistent and will be cleared when the application terminates,
//! which makes it useful for tests and ephemeral sessions.
//!
//! The implementation emulates the integrity rules of the SQLite backend: members
//! require their conversation and user, messages require their conversation, and
//! message ids and provisional ids are unique. All tables live behind a single
//! [`RwLock`], so multi-table operations are atomic.
//!
//! ## Memory Exhaustion Protection
//!
//! The same input limits as the SQLite backend are enforced:
//!
//! - [`MAX_MESSAGE_CONTENT_SIZE`]: Maximum message content size in bytes
//! - [`MAX_CONVERSATION_NAME_LENGTH`]: Maximum conversation name length in bytes
//! - [`MAX_DISPLAY_NAME_LENGTH`]: Maximum user display name length in bytes

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::collections::{BTreeMap, HashMap};

use murmur_storage_traits::conversations::types::{Conversation, User};
use murmur_storage_traits::members::types::Member;
use murmur_storage_traits::messages::types::Message;
use murmur_storage_traits::outbox::types::OutboxEntry;
use murmur_storage_traits::{
    Backend, ConversationId, MessageId, ProvisionalId, SyncStorageProvider, UserId,
};
use parking_lot::RwLock;

mod conversations;
mod members;
mod messages;
mod outbox;

/// Maximum size for message content (64 KiB)
pub const MAX_MESSAGE_CONTENT_SIZE: usize = 64 * 1024;

/// Maximum length for conversation name (255 bytes, UTF-8 encoded)
pub const MAX_CONVERSATION_NAME_LENGTH: usize = 255;

/// Maximum length for user display name (255 bytes, UTF-8 encoded)
pub const MAX_DISPLAY_NAME_LENGTH: usize = 255;

/// Validate a string's UTF-8 byte length, returning the same message as the SQLite backend.
pub(crate) fn validate_string_length(
    s: &str,
    max_length: usize,
    field_name: &str,
) -> Result<(), String> {
    if s.len() > max_length {
        return Err(format!(
            "{field_name} exceeds maximum length of {max_length} bytes (got {} bytes)",
            s.len()
        ));
    }
    Ok(())
}

/// All tables of the local store
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) conversations: BTreeMap<ConversationId, Conversation>,
    pub(crate) users: BTreeMap<UserId, User>,
    pub(crate) members: BTreeMap<(ConversationId, UserId), Member>,
    pub(crate) messages: HashMap<MessageId, Message>,
    /// provisional id -> current row key
    pub(crate) provisional_index: HashMap<ProvisionalId, MessageId>,
    pub(crate) outbox: BTreeMap<ProvisionalId, OutboxEntry>,
}

impl Tables {
    /// Remove a message row together with its index and outbox entries
    pub(crate) fn remove_message(&mut self, message_id: &MessageId) -> Option<Message> {
        let message = self.messages.remove(message_id)?;
        if let Some(provisional_id) = &message.provisional_id {
            self.provisional_index.remove(provisional_id);
            self.outbox.remove(provisional_id);
        }
        Some(message)
    }
}

/// A memory-based storage implementation for the sync engine.
#[derive(Debug, Default)]
pub struct MurmurMemoryStorage {
    pub(crate) inner: RwLock<Tables>,
}

impl MurmurMemoryStorage {
    /// Creates a new empty [`MurmurMemoryStorage`]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncStorageProvider for MurmurMemoryStorage {
    fn backend(&self) -> Backend {
        Backend::Memory
    }
}
