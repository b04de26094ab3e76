//! Error types for the messages module

use std::fmt;

/// Error types for the messages and outbox modules
#[derive(Debug)]
pub enum MessageError {
    /// Invalid parameters
    InvalidParameters(String),
    /// Database error
    DatabaseError(String),
    /// A row with the same id or provisional id already exists
    AlreadyExists,
    /// The conversation the message belongs to does not exist locally
    MissingConversation,
    /// The provisional row was already confirmed under another canonical id
    AlreadyConfirmed,
    /// Message not found or not in expected state
    NotFound,
}

impl std::error::Error for MessageError {}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameters(message) => write!(f, "Invalid parameters: {}", message),
            Self::DatabaseError(message) => write!(f, "Database error: {}", message),
            Self::AlreadyExists => write!(f, "Message already exists"),
            Self::MissingConversation => write!(f, "Conversation does not exist locally"),
            Self::AlreadyConfirmed => write!(f, "Message already confirmed under another id"),
            Self::NotFound => write!(f, "Message not found or not in expected state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_error_display_invalid_parameters() {
        let err = MessageError::InvalidParameters("missing field".to_string());
        assert_eq!(err.to_string(), "Invalid parameters: missing field");
    }

    #[test]
    fn test_message_error_display_database_error() {
        let err = MessageError::DatabaseError("connection lost".to_string());
        assert_eq!(err.to_string(), "Database error: connection lost");
    }

    #[test]
    fn test_message_error_display_uniqueness() {
        assert_eq!(
            MessageError::AlreadyExists.to_string(),
            "Message already exists"
        );
        assert_eq!(
            MessageError::MissingConversation.to_string(),
            "Conversation does not exist locally"
        );
        assert_eq!(
            MessageError::AlreadyConfirmed.to_string(),
            "Message already confirmed under another id"
        );
    }

    #[test]
    fn test_message_error_is_error() {
        let err: Box<dyn std::error::Error> =
            Box::new(MessageError::DatabaseError("test".to_string()));
        assert!(err.to_string().contains("Database error"));
    }
}
