//! Wake channel (push) payloads and handling.
//!
//! A wake payload is a flat string map. It names at least the message and the
//! conversation; it may also carry the full message body, in which case the
//! message can be written locally without a network read.

use std::collections::HashMap;
use std::sync::Arc;

use murmur_storage_traits::messages::types::DEFAULT_MESSAGE_TYPE;
use murmur_storage_traits::{
    CanonicalId, ConversationId, IdError, MessageId, SyncStorageProvider, Timestamp, UserId,
};

use crate::arbiter::{DeliveryArbiter, Outcome, Source};
use crate::config::SyncConfig;
use crate::connection::ConnectionStatus;
use crate::error::RemoteError;
use crate::remote::{with_timeout, RemoteAuthority, RemoteMessage};

pub const NEW_MESSAGE_TYPE: &str = "new_message";
pub const DEFAULT_TITLE: &str = "New message";
pub const DEFAULT_BODY: &str = "You have a new message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakePayload {
    pub message_id: String,
    pub conversation_id: ConversationId,
    pub sender_id: Option<UserId>,
    pub content: Option<String>,
    pub created_at: Option<Timestamp>,
    pub conversation_name: Option<String>,
    pub message_type: Option<String>,
    pub parent_id: Option<MessageId>,
    pub image_url: Option<String>,
}

fn field<'a>(data: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    data.get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

impl WakePayload {
    /// Parse a raw payload. Returns `None` for payloads that are not new-message
    /// notifications or that lack the message or conversation id.
    pub fn parse(data: &HashMap<String, String>) -> Option<Self> {
        if field(data, "type") != Some(NEW_MESSAGE_TYPE) {
            return None;
        }
        let message_id = field(data, "message_id")?.to_string();
        let conversation_id = ConversationId::from(field(data, "group_id")?);

        // An unparseable timestamp still counts as present
        let created_at = field(data, "created_at")
            .map(|raw| Timestamp::parse_rfc3339(raw).unwrap_or_else(Timestamp::now));

        Some(Self {
            message_id,
            conversation_id,
            sender_id: field(data, "user_id").map(UserId::from),
            // Content is the only field that may legitimately be whitespace
            content: data.get("content").filter(|c| !c.is_empty()).cloned(),
            created_at,
            conversation_name: field(data, "group_name").map(str::to_string),
            message_type: field(data, "msg_type").map(str::to_string),
            parent_id: field(data, "parent_id").map(MessageId::new),
            image_url: field(data, "image_url").map(str::to_string),
        })
    }

    pub fn from_message(message: &RemoteMessage, conversation_name: Option<&str>) -> Self {
        Self {
            message_id: message.id.to_string(),
            conversation_id: message.conversation_id.clone(),
            sender_id: Some(message.sender_id.clone()),
            content: Some(message.content.clone()),
            created_at: Some(message.created_at),
            conversation_name: conversation_name.map(str::to_string),
            message_type: Some(message.message_type.clone()),
            parent_id: message.parent_id.clone(),
            image_url: message.image_url.clone(),
        }
    }

    pub fn to_data(&self) -> HashMap<String, String> {
        let mut data = HashMap::new();
        data.insert("type".to_string(), NEW_MESSAGE_TYPE.to_string());
        data.insert("message_id".to_string(), self.message_id.clone());
        data.insert("group_id".to_string(), self.conversation_id.to_string());
        let optional = [
            ("user_id", self.sender_id.as_ref().map(ToString::to_string)),
            ("content", self.content.clone()),
            ("created_at", self.created_at.map(|ts| ts.to_rfc3339())),
            ("group_name", self.conversation_name.clone()),
            ("msg_type", self.message_type.clone()),
            ("parent_id", self.parent_id.as_ref().map(ToString::to_string)),
            ("image_url", self.image_url.clone()),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                data.insert(key.to_string(), value);
            }
        }
        data
    }

    /// Whether the payload carries everything needed to write the message locally
    pub fn is_fully_populated(&self) -> bool {
        self.sender_id.is_some() && self.content.is_some() && self.created_at.is_some()
    }

    pub fn canonical_id(&self) -> Result<CanonicalId, IdError> {
        CanonicalId::parse(&self.message_id)
    }

    /// The message this payload describes, when it is fully populated and carries
    /// a canonical id.
    pub fn to_remote_message(&self) -> Option<RemoteMessage> {
        let id = self.canonical_id().ok()?;
        let mut message = RemoteMessage::new(
            id,
            self.conversation_id.clone(),
            self.sender_id.clone()?,
            self.content.clone()?,
            self.created_at?,
        );
        message.message_type = self
            .message_type
            .clone()
            .unwrap_or_else(|| DEFAULT_MESSAGE_TYPE.to_string());
        message.parent_id = self.parent_id.clone();
        message.image_url = self.image_url.clone();
        Some(message)
    }
}

/// Whether the app is visible, as reported by the platform layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppPresence {
    Foreground,
    #[default]
    Background,
}

/// What the platform layer should do with the notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationDecision {
    ShowNotification { title: String, body: String },
    ShowNotificationAndBumpUnread { title: String, body: String },
    RefreshOpenConversation,
}

pub fn decide_notification(
    payload: &WakePayload,
    presence: AppPresence,
    open_conversation: Option<&ConversationId>,
) -> NotificationDecision {
    let title = payload
        .conversation_name
        .clone()
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let body = payload
        .content
        .clone()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BODY.to_string());

    match presence {
        AppPresence::Background => NotificationDecision::ShowNotification { title, body },
        AppPresence::Foreground if open_conversation == Some(&payload.conversation_id) => {
            NotificationDecision::RefreshOpenConversation
        }
        AppPresence::Foreground => {
            NotificationDecision::ShowNotificationAndBumpUnread { title, body }
        }
    }
}

/// How a wake payload was turned into local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeResolution {
    /// Not a new-message payload
    Ignored,
    /// Written from the payload itself
    Direct(Outcome),
    /// Obtained by a targeted read
    Fetched(Outcome),
    /// Obtained by a conversation scan after the targeted read was impossible or failed
    Scanned { observed: usize, inserted: usize },
    /// Every path failed; the next catch-up will pick the message up
    Unresolved(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeOutcome {
    pub resolution: WakeResolution,
    pub decision: Option<NotificationDecision>,
}

pub struct WakeHandler<S> {
    arbiter: Arc<DeliveryArbiter<S>>,
    remote: Arc<dyn RemoteAuthority>,
    connection: Arc<ConnectionStatus>,
    config: SyncConfig,
}

impl<S> WakeHandler<S>
where
    S: SyncStorageProvider,
{
    pub fn new(
        arbiter: Arc<DeliveryArbiter<S>>,
        remote: Arc<dyn RemoteAuthority>,
        connection: Arc<ConnectionStatus>,
        config: SyncConfig,
    ) -> Self {
        Self {
            arbiter,
            remote,
            connection,
            config,
        }
    }

    pub async fn resolve(&self, payload: &WakePayload) -> WakeResolution {
        // Skip the network read only when the live path cannot race us
        if payload.is_fully_populated() && !self.connection.is_connected() {
            if let Some(message) = payload.to_remote_message() {
                return match self.arbiter.observe(message, Source::Wake) {
                    Ok(outcome) => WakeResolution::Direct(outcome),
                    Err(e) => WakeResolution::Unresolved(e.to_string()),
                };
            }
        }

        let fetch_error = match payload.canonical_id() {
            Ok(id) => {
                let fetched = with_timeout(
                    self.config.request_timeout(),
                    self.remote.fetch_message(&id),
                )
                .await;
                match fetched {
                    Ok(message) => {
                        return match self.arbiter.observe(message, Source::Wake) {
                            Ok(outcome) => WakeResolution::Fetched(outcome),
                            Err(e) => WakeResolution::Unresolved(e.to_string()),
                        };
                    }
                    Err(e) => e,
                }
            }
            Err(e) => RemoteError::MalformedId(e),
        };

        tracing::info!(
            conversation = %payload.conversation_id,
            error = %fetch_error,
            "wake: targeted read unavailable, scanning conversation"
        );
        self.scan_fallback(&payload.conversation_id).await
    }

    async fn scan_fallback(&self, conversation_id: &ConversationId) -> WakeResolution {
        let since = Timestamp::now().saturating_sub(self.config.wake_fallback_window());
        let scanned = with_timeout(
            self.config.request_timeout(),
            self.remote
                .scan_messages(conversation_id, since, self.config.catch_up_page_size),
        )
        .await;

        match scanned {
            Ok(messages) => {
                let observed = messages.len();
                let inserted = self.arbiter.observe_all(messages, Source::Wake);
                WakeResolution::Scanned { observed, inserted }
            }
            Err(e) => {
                tracing::warn!(conversation = %conversation_id, %e, "wake: fallback scan failed");
                WakeResolution::Unresolved(e.to_string())
            }
        }
    }
}
