//! Input validation constants and utilities for SQLite storage.
//!
//! These limits prevent unbounded user input from causing disk and CPU exhaustion.

use crate::error::Error;

/// Maximum size for message content (64 KiB)
pub const MAX_MESSAGE_CONTENT_SIZE: usize = 64 * 1024;

/// Maximum length for conversation name (255 bytes, UTF-8 encoded)
pub const MAX_CONVERSATION_NAME_LENGTH: usize = 255;

/// Maximum length for user display name (255 bytes, UTF-8 encoded)
pub const MAX_DISPLAY_NAME_LENGTH: usize = 255;

/// Validate that a string does not exceed the specified maximum length in bytes.
///
/// Note: This validates UTF-8 byte length, not Unicode character count.
/// Multi-byte characters (e.g., emoji) will count as multiple bytes.
#[inline]
pub fn validate_string_length(s: &str, max_length: usize, field_name: &str) -> Result<(), Error> {
    if s.len() > max_length {
        return Err(Error::Validation {
            field_name: field_name.to_string(),
            max_size: max_length,
            actual_size: s.len(),
        });
    }
    Ok(())
}
