//! Types for the messages module

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::MessageError;
use crate::ids::{CanonicalId, ConversationId, MessageId, ProvisionalId, Timestamp, UserId};

/// Message type used when none is given
pub const DEFAULT_MESSAGE_TYPE: &str = "text";

/// A chat message in the local replica
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    /// Row key: canonical id once confirmed, provisional id before
    pub id: MessageId,
    /// Conversation the message belongs to
    pub conversation_id: ConversationId,
    /// Sender
    pub sender_id: UserId,
    /// Message body
    pub content: String,
    /// Creation time. For messages sent from this device this is the local send
    /// time and is kept when the message is confirmed.
    pub created_at: Timestamp,
    /// Provisional id the message was sent with, if it was sent from this device
    pub provisional_id: Option<ProvisionalId>,
    /// Timestamp assigned by the remote authority
    pub server_created_at: Option<Timestamp>,
    /// Delivery state
    pub state: DeliveryState,
    /// Message type (`text` by default), carried without interpretation
    pub message_type: String,
    /// Message this one replies to
    pub parent_id: Option<MessageId>,
    /// Attached image
    pub image_url: Option<String>,
}

impl Message {
    /// A pending message keyed by a fresh provisional id
    pub fn pending(
        provisional_id: ProvisionalId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::from(&provisional_id),
            conversation_id,
            sender_id,
            content: content.into(),
            created_at,
            provisional_id: Some(provisional_id),
            server_created_at: None,
            state: DeliveryState::Pending,
            message_type: DEFAULT_MESSAGE_TYPE.to_string(),
            parent_id: None,
            image_url: None,
        }
    }

    /// A confirmed message as observed from the remote authority
    pub fn confirmed(
        id: CanonicalId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::from(id),
            conversation_id,
            sender_id,
            content: content.into(),
            created_at,
            provisional_id: None,
            server_created_at: Some(created_at),
            state: DeliveryState::Confirmed,
            message_type: DEFAULT_MESSAGE_TYPE.to_string(),
            parent_id: None,
            image_url: None,
        }
    }

    /// The canonical id, if the row is keyed by one
    pub fn canonical_id(&self) -> Option<CanonicalId> {
        self.id.canonical().ok()
    }

    /// Compares two messages for display ordering.
    ///
    /// Returns [`Ordering::Greater`] if `self` should appear **before** `other`
    /// in a newest-first list: `created_at` first, then `id` for determinism.
    pub fn display_order_cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Delivery state of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Stored locally, not yet accepted by the remote authority
    Pending,
    /// Accepted by the remote authority and keyed by its canonical id
    Confirmed,
    /// Sending gave up or was cancelled; can be retried
    Failed,
}

impl DeliveryState {
    /// Get as `&str`
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    /// Whether the message still has no canonical id
    pub fn is_unconfirmed(&self) -> bool {
        !matches!(self, Self::Confirmed)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeliveryState {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            _ => Err(MessageError::InvalidParameters(format!(
                "Invalid delivery state: {}",
                s
            ))),
        }
    }
}

/// Unread messages of a conversation relative to a watermark
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadSummary {
    /// Number of unread messages
    pub count: usize,
    /// Oldest unread message, where the unread separator goes
    pub first_unread: Option<MessageId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_state_round_trip() {
        for state in [
            DeliveryState::Pending,
            DeliveryState::Confirmed,
            DeliveryState::Failed,
        ] {
            assert_eq!(DeliveryState::from_str(state.as_str()).unwrap(), state);
        }
        assert!(DeliveryState::from_str("sent").is_err());
        assert!(DeliveryState::Pending.is_unconfirmed());
        assert!(DeliveryState::Failed.is_unconfirmed());
        assert!(!DeliveryState::Confirmed.is_unconfirmed());
    }

    #[test]
    fn test_pending_and_confirmed_constructors() {
        let provisional = ProvisionalId::generate();
        let pending = Message::pending(
            provisional.clone(),
            ConversationId::new("c1"),
            UserId::new("u1"),
            "hi",
            Timestamp::from_millis(1_000),
        );
        assert_eq!(pending.id, MessageId::from(&provisional));
        assert_eq!(pending.state, DeliveryState::Pending);
        assert!(pending.canonical_id().is_none());
        assert_eq!(pending.message_type, DEFAULT_MESSAGE_TYPE);

        let canonical = CanonicalId::generate();
        let confirmed = Message::confirmed(
            canonical,
            ConversationId::new("c1"),
            UserId::new("u2"),
            "hey",
            Timestamp::from_millis(2_000),
        );
        assert_eq!(confirmed.canonical_id(), Some(canonical));
        assert_eq!(confirmed.server_created_at, Some(Timestamp::from_millis(2_000)));
    }

    #[test]
    fn test_display_order_cmp() {
        let a = Message::confirmed(
            CanonicalId::generate(),
            ConversationId::new("c1"),
            UserId::new("u1"),
            "a",
            Timestamp::from_millis(1_000),
        );
        let mut b = a.clone();
        b.created_at = Timestamp::from_millis(2_000);

        assert_eq!(b.display_order_cmp(&a), Ordering::Greater);
        assert_eq!(a.display_order_cmp(&b), Ordering::Less);
        assert_eq!(a.display_order_cmp(&a), Ordering::Equal);
    }
}
