//! Error types for the conversations module

use std::fmt;

/// Error types for the conversations module
#[derive(Debug)]
pub enum ConversationError {
    /// Invalid parameters
    InvalidParameters(String),
    /// Database error
    DatabaseError(String),
    /// Conversation not found
    NotFound,
}

impl std::error::Error for ConversationError {}

impl fmt::Display for ConversationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameters(message) => write!(f, "Invalid parameters: {}", message),
            Self::DatabaseError(message) => write!(f, "Database error: {}", message),
            Self::NotFound => write!(f, "Conversation not found"),
        }
    }
}
