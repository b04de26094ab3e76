//! Types for the conversations module

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, Timestamp, UserId};

/// A conversation (group chat) replicated from the remote authority
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conversation {
    /// Server-assigned id
    pub id: ConversationId,
    /// Display name
    pub name: String,
    /// User that created the conversation, when known
    pub created_by: Option<UserId>,
    /// Creation time
    pub created_at: Timestamp,
    /// Last time the conversation was synced from the remote authority
    pub last_synced_at: Option<Timestamp>,
}

impl Conversation {
    /// Create a conversation that has never been synced
    pub fn new(id: ConversationId, name: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            id,
            name: name.into(),
            created_by: None,
            created_at,
            last_synced_at: None,
        }
    }
}

/// A user known to this device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    /// Server-assigned id
    pub id: UserId,
    /// Display name
    pub display_name: String,
    /// Avatar URL
    pub avatar_url: Option<String>,
}

impl User {
    /// Create a user without an avatar
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            avatar_url: None,
        }
    }
}
