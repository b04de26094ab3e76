//! Types for the outbox module

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, ProvisionalId, Timestamp};

/// A not-yet-confirmed outgoing message with its retry schedule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Provisional id of the pending message
    pub provisional_id: ProvisionalId,
    /// Conversation the message is sent to
    pub conversation_id: ConversationId,
    /// Failed attempts so far
    pub attempts: u32,
    /// Earliest time the next attempt may run
    pub next_attempt_at: Timestamp,
    /// Error of the last failed attempt
    pub last_error: Option<String>,
    /// When the entry was queued
    pub created_at: Timestamp,
}

impl OutboxEntry {
    /// A fresh entry that is due immediately
    pub fn new(
        provisional_id: ProvisionalId,
        conversation_id: ConversationId,
        created_at: Timestamp,
    ) -> Self {
        Self {
            provisional_id,
            conversation_id,
            attempts: 0,
            next_attempt_at: created_at,
            last_error: None,
            created_at,
        }
    }

    /// Whether the entry may be attempted at `now`
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.next_attempt_at <= now
    }
}
