//! Error types for the members module

use std::fmt;

/// Error types for the members module
#[derive(Debug)]
pub enum MemberError {
    /// Invalid parameters
    InvalidParameters(String),
    /// Database error
    DatabaseError(String),
    /// The conversation or user row the member references does not exist yet
    MissingParent {
        /// The conversation row is missing
        conversation: bool,
        /// The user row is missing
        user: bool,
    },
    /// Member not found
    NotFound,
}

impl std::error::Error for MemberError {}

impl fmt::Display for MemberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameters(message) => write!(f, "Invalid parameters: {}", message),
            Self::DatabaseError(message) => write!(f, "Database error: {}", message),
            Self::MissingParent { conversation, user } => write!(
                f,
                "Missing parent row (conversation missing: {conversation}, user missing: {user})"
            ),
            Self::NotFound => write!(f, "Member not found"),
        }
    }
}
