//! Types for the members module

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::MemberError;
use crate::ids::{ConversationId, MessageId, Timestamp, UserId};

/// The last message a user is considered to have read in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Watermark {
    /// Creation time of the last read message
    pub at: Timestamp,
    /// Id of the last read message
    pub message_id: MessageId,
}

impl Watermark {
    /// Create a new watermark
    pub fn new(at: Timestamp, message_id: MessageId) -> Self {
        Self { at, message_id }
    }

    /// Whether this watermark should replace `current`.
    ///
    /// A missing current watermark is always replaced. Equal timestamps are not
    /// newer: the first writer wins.
    pub fn is_newer_than(&self, current: Option<&Watermark>) -> bool {
        match current {
            None => true,
            Some(current) => self.at > current.at,
        }
    }
}

/// Role of a member in a conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// Regular member
    #[default]
    Member,
    /// Admin
    Admin,
}

impl MemberRole {
    /// Get as `&str`
    pub fn as_str(&self) -> &str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MemberRole {
    type Err = MemberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Self::Member),
            "admin" => Ok(Self::Admin),
            _ => Err(MemberError::InvalidParameters(format!(
                "Invalid member role: {}",
                s
            ))),
        }
    }
}

/// A user's membership in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    /// Conversation id
    pub conversation_id: ConversationId,
    /// User id
    pub user_id: UserId,
    /// Role
    pub role: MemberRole,
    /// Read watermark
    pub last_read: Option<Watermark>,
}

impl Member {
    /// Create a regular member without a watermark
    pub fn new(conversation_id: ConversationId, user_id: UserId) -> Self {
        Self {
            conversation_id,
            user_id,
            role: MemberRole::Member,
            last_read: None,
        }
    }
}
