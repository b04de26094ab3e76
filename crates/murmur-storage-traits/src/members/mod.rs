//! Members module
//!
//! A member row links a user to a conversation and carries that user's read
//! watermark for the conversation. A member row may only exist once both its
//! conversation and its user exist locally; backends check this before touching
//! the database and report [`MemberError::MissingParent`].

use crate::ids::{ConversationId, UserId};

pub mod error;
pub mod types;

use self::error::MemberError;
use self::types::*;

/// Storage traits for the members module
pub trait MemberStorage {
    /// Insert or update a member.
    ///
    /// The role is overwritten. The stored watermark is only replaced when the
    /// incoming one is strictly newer, so re-saving a member never regresses read state.
    fn save_member(&self, member: Member) -> Result<(), MemberError>;

    /// Find a member by conversation and user
    fn find_member(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Option<Member>, MemberError>;

    /// All members of a conversation, ordered by user id
    fn members(&self, conversation_id: &ConversationId) -> Result<Vec<Member>, MemberError>;

    /// Move the read watermark forward.
    ///
    /// Applies only if no watermark is stored or `watermark.at` is strictly greater
    /// than the stored one. Returns whether the watermark changed.
    /// Returns [`MemberError::NotFound`] if the member row does not exist.
    fn advance_watermark(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        watermark: Watermark,
    ) -> Result<bool, MemberError>;

    /// The stored read watermark, if any
    fn watermark(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Option<Watermark>, MemberError>;
}
