//! [`RemoteAuthority`] over a PostgREST-style HTTP API.
//!
//! Tables: `messages`, `groups`, `group_members` (which also carries each
//! member's read watermark) and `users`. Wake fanout is a function endpoint.

use async_trait::async_trait;
use murmur_storage_traits::conversations::types::{Conversation, User};
use murmur_storage_traits::members::types::{MemberRole, Watermark};
use murmur_storage_traits::messages::types::DEFAULT_MESSAGE_TYPE;
use murmur_storage_traits::{
    CanonicalId, ConversationId, MessageId, ProvisionalId, Timestamp, UserId,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{NewMessage, RemoteAuthority, RemoteMember, RemoteMessage, WriteAck};
use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncError};

const MESSAGE_COLUMNS: &str =
    "id,group_id,user_id,content,created_at,msg_type,parent_id,image_url,client_id";

#[derive(Debug, Clone)]
pub struct HttpAuthority {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    group_id: String,
    user_id: String,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
    #[serde(default)]
    msg_type: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
}

impl MessageRow {
    fn from_new(message: &NewMessage) -> Self {
        Self {
            id: None,
            group_id: message.conversation_id.to_string(),
            user_id: message.sender_id.to_string(),
            content: message.content.clone(),
            created_at: None,
            msg_type: Some(message.message_type.clone()),
            parent_id: message.parent_id.as_ref().map(ToString::to_string),
            image_url: message.image_url.clone(),
            client_id: Some(message.provisional_id.to_string()),
        }
    }

    fn from_remote(message: &RemoteMessage) -> Self {
        Self {
            id: Some(message.id.to_string()),
            group_id: message.conversation_id.to_string(),
            user_id: message.sender_id.to_string(),
            content: message.content.clone(),
            created_at: Some(message.created_at.to_rfc3339()),
            msg_type: Some(message.message_type.clone()),
            parent_id: message.parent_id.as_ref().map(ToString::to_string),
            image_url: message.image_url.clone(),
            client_id: message.provisional_id.as_ref().map(ToString::to_string),
        }
    }

    fn into_remote(self) -> Result<RemoteMessage, RemoteError> {
        let id = self
            .id
            .as_deref()
            .ok_or_else(|| RemoteError::Decode("message row without id".to_string()))?;
        let id = CanonicalId::parse(id)?;
        let created_at = parse_time(self.created_at.as_deref())
            .ok_or_else(|| RemoteError::Decode(format!("message {id} without created_at")))?;
        Ok(RemoteMessage {
            id,
            conversation_id: ConversationId::new(self.group_id),
            sender_id: UserId::new(self.user_id),
            content: self.content,
            created_at,
            message_type: self
                .msg_type
                .unwrap_or_else(|| DEFAULT_MESSAGE_TYPE.to_string()),
            parent_id: self.parent_id.map(MessageId::new),
            image_url: self.image_url,
            provisional_id: self
                .client_id
                .as_deref()
                .and_then(|value| ProvisionalId::parse(value).ok()),
        })
    }
}

/// Rows that do not decode are logged and left out; the rest of the page stands.
fn decode_page(rows: Vec<MessageRow>) -> Vec<RemoteMessage> {
    rows.into_iter()
        .filter_map(|row| match row.into_remote() {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(%e, "skipping undecodable message row");
                None
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct GroupRow {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

impl GroupRow {
    fn into_conversation(self) -> Conversation {
        let created_at = parse_time(self.created_at.as_deref()).unwrap_or_default();
        let mut conversation = Conversation::new(
            ConversationId::new(self.id),
            self.name.unwrap_or_default(),
            created_at,
        );
        conversation.created_by = self.created_by.map(UserId::new);
        conversation
    }
}

#[derive(Debug, Deserialize)]
struct MembershipRow {
    group_id: String,
}

#[derive(Debug, Deserialize)]
struct UserRow {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

impl UserRow {
    fn into_user(self) -> User {
        let display_name = self.display_name.unwrap_or_else(|| self.id.clone());
        let mut user = User::new(UserId::new(self.id), display_name);
        user.avatar_url = self.avatar_url;
        user
    }
}

#[derive(Debug, Deserialize)]
struct MemberRow {
    user_id: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    users: Option<UserRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WatermarkRow {
    #[serde(default)]
    last_read_at: Option<String>,
    #[serde(default)]
    last_read_message_id: Option<String>,
}

impl WatermarkRow {
    fn into_watermark(self) -> Option<Watermark> {
        let at = parse_time(self.last_read_at.as_deref())?;
        let message_id = self.last_read_message_id?;
        Some(Watermark::new(at, MessageId::new(message_id)))
    }
}

#[derive(Debug, Serialize)]
struct WakeRequest {
    record: MessageRow,
}

fn parse_time(value: Option<&str>) -> Option<Timestamp> {
    value.and_then(Timestamp::parse_rfc3339)
}

fn map_send_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        return RemoteError::Transient(format!("request timed out: {err}"));
    }
    if err.is_decode() {
        return RemoteError::Decode(err.to_string());
    }
    RemoteError::Transient(err.to_string())
}

impl HttpAuthority {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, SyncError> {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SyncError::InvalidInput(
                "remote base URL cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            api_key: api_key.into(),
        })
    }

    /// Build from the configured URL and key. `None` when no URL is configured.
    pub fn from_config(config: &SyncConfig) -> Option<Result<Self, SyncError>> {
        let url = config.remote_url()?;
        Some(Self::new(url, config.remote_api_key().unwrap_or_default()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            return builder;
        }
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let resp = self.request(builder).send().await.map_err(map_send_error)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound);
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            tracing::debug!(%status, %body, "remote authority unavailable");
        }
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message: body,
        })
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, RemoteError> {
        let resp = self.send(self.client.get(self.table(table)).query(query)).await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, RemoteError> {
    let bytes = resp.bytes().await.map_err(map_send_error)?;
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl RemoteAuthority for HttpAuthority {
    async fn insert_message(&self, message: &NewMessage) -> Result<WriteAck, RemoteError> {
        let resp = self
            .send(
                self.client
                    .post(self.table("messages"))
                    .header("Prefer", "return=representation")
                    .json(&MessageRow::from_new(message)),
            )
            .await?;
        let rows: Vec<MessageRow> = decode(resp).await?;

        // The write has committed; anything missing from here on is the
        // authority's fault and must not be papered over with a local id.
        let row = rows.into_iter().next().ok_or_else(|| {
            RemoteError::ContractViolation("insert returned no rows".to_string())
        })?;
        let id = row
            .id
            .as_deref()
            .ok_or_else(|| RemoteError::ContractViolation("insert returned no id".to_string()))?;
        let id = CanonicalId::parse(id).map_err(|e| {
            RemoteError::ContractViolation(format!("insert returned a non-canonical id: {e}"))
        })?;
        let created_at = parse_time(row.created_at.as_deref()).ok_or_else(|| {
            RemoteError::ContractViolation(format!("insert of {id} returned no created_at"))
        })?;
        Ok(WriteAck { id, created_at })
    }

    async fn fetch_message(&self, id: &CanonicalId) -> Result<RemoteMessage, RemoteError> {
        let rows: Vec<MessageRow> = self
            .get_rows(
                "messages",
                &[("select", MESSAGE_COLUMNS.to_string()), ("id", eq(id))],
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or(RemoteError::NotFound)?
            .into_remote()
    }

    async fn scan_messages(
        &self,
        conversation_id: &ConversationId,
        since: Timestamp,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, RemoteError> {
        let rows: Vec<MessageRow> = self
            .get_rows(
                "messages",
                &[
                    ("select", MESSAGE_COLUMNS.to_string()),
                    ("group_id", eq(conversation_id)),
                    ("created_at", format!("gte.{}", since.to_rfc3339())),
                    ("order", "created_at.asc,id.asc".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(decode_page(rows))
    }

    async fn recent_messages(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, RemoteError> {
        let rows: Vec<MessageRow> = self
            .get_rows(
                "messages",
                &[
                    ("select", MESSAGE_COLUMNS.to_string()),
                    ("group_id", eq(conversation_id)),
                    ("order", "created_at.desc,id.desc".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let mut messages = decode_page(rows);
        messages.reverse();
        Ok(messages)
    }

    async fn conversations(&self, user_id: &UserId) -> Result<Vec<Conversation>, RemoteError> {
        let memberships: Vec<MembershipRow> = self
            .get_rows(
                "group_members",
                &[("select", "group_id".to_string()), ("user_id", eq(user_id))],
            )
            .await?;
        if memberships.is_empty() {
            return Ok(Vec::new());
        }

        let ids = memberships
            .iter()
            .map(|m| m.group_id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let groups: Vec<GroupRow> = self
            .get_rows(
                "groups",
                &[
                    ("select", "id,name,created_by,created_at".to_string()),
                    ("id", format!("in.({ids})")),
                ],
            )
            .await?;
        Ok(groups.into_iter().map(GroupRow::into_conversation).collect())
    }

    async fn other_members(
        &self,
        conversation_id: &ConversationId,
        exclude: &UserId,
    ) -> Result<Vec<RemoteMember>, RemoteError> {
        let rows: Vec<MemberRow> = self
            .get_rows(
                "group_members",
                &[
                    (
                        "select",
                        "user_id,role,users(id,display_name,avatar_url)".to_string(),
                    ),
                    ("group_id", eq(conversation_id)),
                    ("user_id", format!("neq.{exclude}")),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.user_id != exclude.as_str())
            .map(|row| {
                let role = row
                    .role
                    .as_deref()
                    .and_then(|role| role.parse::<MemberRole>().ok())
                    .unwrap_or_default();
                let user = match row.users {
                    Some(user) => user.into_user(),
                    None => User::new(UserId::new(row.user_id.clone()), row.user_id),
                };
                RemoteMember { user, role }
            })
            .collect())
    }

    async fn fetch_user(&self, user_id: &UserId) -> Result<User, RemoteError> {
        let rows: Vec<UserRow> = self
            .get_rows(
                "users",
                &[
                    ("select", "id,display_name,avatar_url".to_string()),
                    ("id", eq(user_id)),
                ],
            )
            .await?;
        rows.into_iter()
            .next()
            .map(UserRow::into_user)
            .ok_or(RemoteError::NotFound)
    }

    async fn read_watermark(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Option<Watermark>, RemoteError> {
        let rows: Vec<WatermarkRow> = self
            .get_rows(
                "group_members",
                &[
                    ("select", "last_read_at,last_read_message_id".to_string()),
                    ("group_id", eq(conversation_id)),
                    ("user_id", eq(user_id)),
                ],
            )
            .await?;
        let row = rows.into_iter().next().ok_or(RemoteError::NotFound)?;
        Ok(row.into_watermark())
    }

    async fn write_watermark(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        watermark: &Watermark,
    ) -> Result<(), RemoteError> {
        let resp = self
            .send(
                self.client
                    .patch(self.table("group_members"))
                    .query(&[("group_id", eq(conversation_id)), ("user_id", eq(user_id))])
                    .header("Prefer", "return=representation")
                    .json(&WatermarkRow {
                        last_read_at: Some(watermark.at.to_rfc3339()),
                        last_read_message_id: Some(watermark.message_id.to_string()),
                    }),
            )
            .await?;
        let rows: Vec<WatermarkRow> = decode(resp).await?;
        if rows.is_empty() {
            return Err(RemoteError::NotFound);
        }
        Ok(())
    }

    async fn notify_wake(&self, message: &RemoteMessage) -> Result<(), RemoteError> {
        let url = format!("{}/functions/v1/send-push", self.base_url);
        self.send(self.client.post(url).json(&WakeRequest {
            record: MessageRow::from_remote(message),
        }))
        .await?;
        Ok(())
    }
}
