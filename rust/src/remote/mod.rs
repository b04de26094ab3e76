//! The remote authority: source of truth and canonical id generator.
//!
//! The engine only talks to it through [`RemoteAuthority`]. Every call is wrapped
//! in [`with_timeout`], which drops (and so cancels) the underlying future when
//! the deadline passes.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use murmur_storage_traits::conversations::types::{Conversation, User};
use murmur_storage_traits::members::types::{MemberRole, Watermark};
use murmur_storage_traits::messages::types::{DeliveryState, Message, DEFAULT_MESSAGE_TYPE};
use murmur_storage_traits::{
    CanonicalId, ConversationId, MessageId, ProvisionalId, Timestamp, UserId,
};

use crate::error::RemoteError;

pub mod http;
pub mod in_process;

pub use http::HttpAuthority;
pub use in_process::InProcessAuthority;

/// A message write as sent to the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub provisional_id: ProvisionalId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: Timestamp,
    pub message_type: String,
    pub parent_id: Option<MessageId>,
    pub image_url: Option<String>,
}

impl NewMessage {
    pub fn from_pending(message: &Message) -> Result<Self, RemoteError> {
        let provisional_id = message.provisional_id.clone().ok_or_else(|| {
            RemoteError::ContractViolation(format!("message {} has no provisional id", message.id))
        })?;
        Ok(Self {
            provisional_id,
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
            message_type: message.message_type.clone(),
            parent_id: message.parent_id.clone(),
            image_url: message.image_url.clone(),
        })
    }
}

/// The authority's answer to a write. Both fields are mandatory; an
/// implementation that cannot produce them must return
/// [`RemoteError::ContractViolation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    pub id: CanonicalId,
    pub created_at: Timestamp,
}

/// A committed message as the authority reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    pub id: CanonicalId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: Timestamp,
    pub message_type: String,
    pub parent_id: Option<MessageId>,
    pub image_url: Option<String>,
    /// Provisional id the sender used, when the authority echoes it back
    pub provisional_id: Option<ProvisionalId>,
}

impl RemoteMessage {
    pub fn new(
        id: CanonicalId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_id,
            content: content.into(),
            created_at,
            message_type: DEFAULT_MESSAGE_TYPE.to_string(),
            parent_id: None,
            image_url: None,
            provisional_id: None,
        }
    }

    /// The local row for this message. The provisional id is not carried over:
    /// it is only ever attached by relabeling a row this device created.
    pub fn to_local(&self) -> Message {
        Message {
            id: MessageId::from(self.id),
            conversation_id: self.conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            content: self.content.clone(),
            created_at: self.created_at,
            provisional_id: None,
            server_created_at: Some(self.created_at),
            state: DeliveryState::Confirmed,
            message_type: self.message_type.clone(),
            parent_id: self.parent_id.clone(),
            image_url: self.image_url.clone(),
        }
    }
}

/// Another member of a conversation, with the user row it needs locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMember {
    pub user: User,
    pub role: MemberRole,
}

#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Write a new message. Must surface the canonical id and timestamp.
    async fn insert_message(&self, message: &NewMessage) -> Result<WriteAck, RemoteError>;

    /// Targeted read by canonical id.
    async fn fetch_message(&self, id: &CanonicalId) -> Result<RemoteMessage, RemoteError>;

    /// Messages with `created_at >= since`, ascending by `(created_at, id)`, at
    /// most `limit`. Rows that cannot be decoded are skipped, so a page may come
    /// back short.
    async fn scan_messages(
        &self,
        conversation_id: &ConversationId,
        since: Timestamp,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, RemoteError>;

    /// The newest `limit` messages, returned in ascending order.
    async fn recent_messages(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, RemoteError>;

    /// Conversations `user_id` belongs to.
    async fn conversations(&self, user_id: &UserId) -> Result<Vec<Conversation>, RemoteError>;

    /// Members of a conversation other than `exclude`. The caller is never
    /// part of the result.
    async fn other_members(
        &self,
        conversation_id: &ConversationId,
        exclude: &UserId,
    ) -> Result<Vec<RemoteMember>, RemoteError>;

    async fn fetch_user(&self, user_id: &UserId) -> Result<User, RemoteError>;

    async fn read_watermark(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Option<Watermark>, RemoteError>;

    async fn write_watermark(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        watermark: &Watermark,
    ) -> Result<(), RemoteError>;

    /// Ask the wake fanout to notify the other members about a committed message.
    async fn notify_wake(&self, message: &RemoteMessage) -> Result<(), RemoteError>;
}

/// Run a remote call under a deadline. On expiry the future is dropped, which
/// cancels the in-flight request.
pub async fn with_timeout<T, F>(deadline: Duration, future: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(deadline)),
    }
}
