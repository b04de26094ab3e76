//! Database utilities for SQLite storage.

use std::io::{Error as IoError, ErrorKind};
use std::str::FromStr;

use murmur_storage_traits::conversations::types::{Conversation, User};
use murmur_storage_traits::members::types::{Member, MemberRole, Watermark};
use murmur_storage_traits::messages::types::{DeliveryState, Message};
use murmur_storage_traits::outbox::types::OutboxEntry;
use murmur_storage_traits::{ConversationId, MessageId, ProvisionalId, Timestamp, UserId};
use rusqlite::types::Type;
use rusqlite::{Error, Result as SqliteResult, Row};

#[inline]
fn map_invalid_text_data(msg: &str) -> Error {
    Error::FromSqlConversionFailure(
        0,
        Type::Text,
        Box::new(IoError::new(ErrorKind::InvalidData, msg)),
    )
}

/// Whether a rusqlite error is a PRIMARY KEY or UNIQUE violation
pub fn is_unique_violation(err: &Error) -> bool {
    matches!(
        err,
        Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Whether a rusqlite error is a FOREIGN KEY violation
pub fn is_foreign_key_violation(err: &Error) -> bool {
    matches!(
        err,
        Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

/// Convert a row to a Conversation struct
pub fn row_to_conversation(row: &Row) -> SqliteResult<Conversation> {
    let id: String = row.get("id")?;
    let created_by: Option<String> = row.get("created_by")?;
    let created_at: i64 = row.get("created_at")?;
    let last_synced_at: Option<i64> = row.get("last_synced_at")?;

    Ok(Conversation {
        id: ConversationId::new(id),
        name: row.get("name")?,
        created_by: created_by.map(UserId::new),
        created_at: Timestamp::from_millis(created_at),
        last_synced_at: last_synced_at.map(Timestamp::from_millis),
    })
}

/// Convert a row to a User struct
pub fn row_to_user(row: &Row) -> SqliteResult<User> {
    let id: String = row.get("id")?;
    Ok(User {
        id: UserId::new(id),
        display_name: row.get("display_name")?,
        avatar_url: row.get("avatar_url")?,
    })
}

/// Convert a row to a Member struct
pub fn row_to_member(row: &Row) -> SqliteResult<Member> {
    let conversation_id: String = row.get("conversation_id")?;
    let user_id: String = row.get("user_id")?;
    let role: &str = row.get_ref("role")?.as_str()?;
    let role: MemberRole =
        MemberRole::from_str(role).map_err(|_| map_invalid_text_data("Invalid member role"))?;

    Ok(Member {
        conversation_id: ConversationId::new(conversation_id),
        user_id: UserId::new(user_id),
        role,
        last_read: row_to_watermark(row)?,
    })
}

/// Read the watermark columns of a member row
pub fn row_to_watermark(row: &Row) -> SqliteResult<Option<Watermark>> {
    let last_read_at: Option<i64> = row.get("last_read_at")?;
    let last_read_message_id: Option<String> = row.get("last_read_message_id")?;

    Ok(match (last_read_at, last_read_message_id) {
        (Some(at), Some(message_id)) => Some(Watermark::new(
            Timestamp::from_millis(at),
            MessageId::new(message_id),
        )),
        _ => None,
    })
}

/// Convert a row to a Message struct
pub fn row_to_message(row: &Row) -> SqliteResult<Message> {
    let id: String = row.get("id")?;
    let conversation_id: String = row.get("conversation_id")?;
    let sender_id: String = row.get("sender_id")?;
    let created_at: i64 = row.get("created_at")?;
    let provisional_id: Option<String> = row.get("provisional_id")?;
    let server_created_at: Option<i64> = row.get("server_created_at")?;
    let state: &str = row.get_ref("state")?.as_str()?;
    let parent_id: Option<String> = row.get("parent_id")?;

    let provisional_id: Option<ProvisionalId> = match provisional_id {
        Some(value) => Some(
            ProvisionalId::parse(&value)
                .map_err(|_| map_invalid_text_data("Invalid provisional id"))?,
        ),
        None => None,
    };

    let state: DeliveryState =
        DeliveryState::from_str(state).map_err(|_| map_invalid_text_data("Invalid state"))?;

    Ok(Message {
        id: MessageId::new(id),
        conversation_id: ConversationId::new(conversation_id),
        sender_id: UserId::new(sender_id),
        content: row.get("content")?,
        created_at: Timestamp::from_millis(created_at),
        provisional_id,
        server_created_at: server_created_at.map(Timestamp::from_millis),
        state,
        message_type: row.get("message_type")?,
        parent_id: parent_id.map(MessageId::new),
        image_url: row.get("image_url")?,
    })
}

/// Convert a row to an OutboxEntry struct
pub fn row_to_outbox_entry(row: &Row) -> SqliteResult<OutboxEntry> {
    let provisional_id: String = row.get("provisional_id")?;
    let conversation_id: String = row.get("conversation_id")?;
    let next_attempt_at: i64 = row.get("next_attempt_at")?;
    let created_at: i64 = row.get("created_at")?;

    let provisional_id = ProvisionalId::parse(&provisional_id)
        .map_err(|_| map_invalid_text_data("Invalid provisional id"))?;

    Ok(OutboxEntry {
        provisional_id,
        conversation_id: ConversationId::new(conversation_id),
        attempts: row.get("attempts")?,
        next_attempt_at: Timestamp::from_millis(next_attempt_at),
        last_error: row.get("last_error")?,
        created_at: Timestamp::from_millis(created_at),
    })
}
