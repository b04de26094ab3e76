//! Implementation of MessageStorage trait for SQLite storage.

use murmur_storage_traits::messages::error::MessageError;
use murmur_storage_traits::messages::types::{DeliveryState, Message, UnreadSummary};
use murmur_storage_traits::messages::{MessageStorage, Pagination};
use murmur_storage_traits::{
    CanonicalId, ConversationId, MessageId, ProvisionalId, Timestamp, UserId,
};
use rusqlite::{Connection, OptionalExtension, params};

use crate::validation::{MAX_MESSAGE_CONTENT_SIZE, validate_string_length};
use crate::{MurmurSqliteStorage, db};

#[inline]
pub(crate) fn into_message_err<T>(e: T) -> MessageError
where
    T: std::error::Error,
{
    MessageError::DatabaseError(e.to_string())
}

fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Message>, MessageError> {
    conn.query_row(
        "SELECT * FROM messages WHERE id = ?",
        params![id],
        db::row_to_message,
    )
    .optional()
    .map_err(into_message_err)
}

fn find_by_provisional_id(
    conn: &Connection,
    provisional_id: &ProvisionalId,
) -> Result<Option<Message>, MessageError> {
    conn.query_row(
        "SELECT * FROM messages WHERE provisional_id = ?",
        params![provisional_id.as_str()],
        db::row_to_message,
    )
    .optional()
    .map_err(into_message_err)
}

/// Insert a message row, checking parent and uniqueness before the schema does.
pub(crate) fn insert_message(conn: &Connection, message: &Message) -> Result<(), MessageError> {
    validate_string_length(
        &message.content,
        MAX_MESSAGE_CONTENT_SIZE,
        "Message content",
    )
    .map_err(|e| MessageError::InvalidParameters(e.to_string()))?;

    let conversation_exists = conn
        .query_row(
            "SELECT 1 FROM conversations WHERE id = ?",
            params![message.conversation_id.as_str()],
            |_| Ok(()),
        )
        .optional()
        .map_err(into_message_err)?
        .is_some();
    if !conversation_exists {
        return Err(MessageError::MissingConversation);
    }

    conn.execute(
        "INSERT INTO messages
         (id, conversation_id, sender_id, content, created_at, provisional_id,
          server_created_at, state, message_type, parent_id, image_url)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            message.id.as_str(),
            message.conversation_id.as_str(),
            message.sender_id.as_str(),
            &message.content,
            message.created_at.as_millis(),
            message.provisional_id.as_ref().map(|p| p.as_str()),
            message.server_created_at.map(|t| t.as_millis()),
            message.state.as_str(),
            &message.message_type,
            message.parent_id.as_ref().map(|p| p.as_str()),
            &message.image_url,
        ],
    )
    .map_err(|e| {
        if db::is_unique_violation(&e) {
            MessageError::AlreadyExists
        } else if db::is_foreign_key_violation(&e) {
            MessageError::MissingConversation
        } else {
            into_message_err(e)
        }
    })?;

    Ok(())
}

impl MessageStorage for MurmurSqliteStorage {
    fn save_message(&self, message: Message) -> Result<(), MessageError> {
        self.with_connection(|conn| insert_message(conn, &message))
    }

    fn find_message(&self, message_id: &MessageId) -> Result<Option<Message>, MessageError> {
        self.with_connection(|conn| find_by_id(conn, message_id.as_str()))
    }

    fn find_message_by_provisional_id(
        &self,
        provisional_id: &ProvisionalId,
    ) -> Result<Option<Message>, MessageError> {
        self.with_connection(|conn| find_by_provisional_id(conn, provisional_id))
    }

    fn find_unconfirmed_by_signature(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<Message>, MessageError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM messages
                     WHERE conversation_id = ? AND sender_id = ? AND content = ?
                       AND created_at >= ? AND created_at <= ?
                       AND state != 'confirmed'
                     ORDER BY created_at ASC, id ASC",
                )
                .map_err(into_message_err)?;

            let rows = stmt
                .query_map(
                    params![
                        conversation_id.as_str(),
                        sender_id.as_str(),
                        content,
                        from.as_millis(),
                        to.as_millis(),
                    ],
                    db::row_to_message,
                )
                .map_err(into_message_err)?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(into_message_err)
        })
    }

    fn relabel_message(
        &self,
        provisional_id: &ProvisionalId,
        canonical_id: &CanonicalId,
        server_created_at: Timestamp,
    ) -> Result<Message, MessageError> {
        let canonical_key = MessageId::from(canonical_id);

        self.with_savepoint("murmur_relabel_message", into_message_err, |conn| {
            let provisional_row = find_by_provisional_id(conn, provisional_id)?;
            let canonical_row = find_by_id(conn, canonical_key.as_str())?;

            match (provisional_row, canonical_row) {
                (None, None) => return Err(MessageError::NotFound),
                (Some(row), _) if row.id == canonical_key => {}
                (Some(row), _) if !row.state.is_unconfirmed() => {
                    return Err(MessageError::AlreadyConfirmed);
                }
                (Some(row), Some(_)) => {
                    // Another path already wrote the canonical row: keep that one.
                    conn.execute("DELETE FROM messages WHERE id = ?", params![row.id.as_str()])
                        .map_err(into_message_err)?;
                    conn.execute(
                        "UPDATE messages SET provisional_id = ?
                         WHERE id = ? AND provisional_id IS NULL",
                        params![provisional_id.as_str(), canonical_key.as_str()],
                    )
                    .map_err(into_message_err)?;
                }
                (Some(row), None) => {
                    conn.execute(
                        "UPDATE messages SET id = ?, state = ?, server_created_at = ?
                         WHERE id = ?",
                        params![
                            canonical_key.as_str(),
                            DeliveryState::Confirmed.as_str(),
                            server_created_at.as_millis(),
                            row.id.as_str(),
                        ],
                    )
                    .map_err(into_message_err)?;
                }
                (None, Some(_)) => {
                    conn.execute(
                        "UPDATE messages SET provisional_id = ?
                         WHERE id = ? AND provisional_id IS NULL",
                        params![provisional_id.as_str(), canonical_key.as_str()],
                    )
                    .map_err(into_message_err)?;
                }
            }

            conn.execute(
                "DELETE FROM outbox WHERE provisional_id = ?",
                params![provisional_id.as_str()],
            )
            .map_err(into_message_err)?;

            find_by_id(conn, canonical_key.as_str())?.ok_or(MessageError::NotFound)
        })
    }

    fn set_message_state(
        &self,
        message_id: &MessageId,
        state: DeliveryState,
    ) -> Result<(), MessageError> {
        self.with_connection(|conn| {
            let updated = conn
                .execute(
                    "UPDATE messages SET state = ? WHERE id = ?",
                    params![state.as_str(), message_id.as_str()],
                )
                .map_err(into_message_err)?;

            if updated == 0 {
                return Err(MessageError::NotFound);
            }
            Ok(())
        })
    }

    fn messages(
        &self,
        conversation_id: &ConversationId,
        pagination: Option<Pagination>,
    ) -> Result<Vec<Message>, MessageError> {
        let pagination = pagination.unwrap_or_default();
        pagination.validate()?;

        let limit = i64::try_from(pagination.limit())
            .map_err(|e| MessageError::InvalidParameters(e.to_string()))?;
        let offset = i64::try_from(pagination.offset())
            .map_err(|e| MessageError::InvalidParameters(e.to_string()))?;

        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM messages WHERE conversation_id = ?
                     ORDER BY created_at DESC, id DESC
                     LIMIT ? OFFSET ?",
                )
                .map_err(into_message_err)?;

            let rows = stmt
                .query_map(
                    params![conversation_id.as_str(), limit, offset],
                    db::row_to_message,
                )
                .map_err(into_message_err)?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(into_message_err)
        })
    }

    fn unread_after(
        &self,
        conversation_id: &ConversationId,
        after: Timestamp,
        exclude_sender: &UserId,
    ) -> Result<UnreadSummary, MessageError> {
        self.with_connection(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages
                     WHERE conversation_id = ? AND created_at > ? AND sender_id != ?",
                    params![
                        conversation_id.as_str(),
                        after.as_millis(),
                        exclude_sender.as_str()
                    ],
                    |row| row.get(0),
                )
                .map_err(into_message_err)?;

            let first_unread: Option<String> = conn
                .query_row(
                    "SELECT id FROM messages
                     WHERE conversation_id = ? AND created_at > ? AND sender_id != ?
                     ORDER BY created_at ASC, id ASC
                     LIMIT 1",
                    params![
                        conversation_id.as_str(),
                        after.as_millis(),
                        exclude_sender.as_str()
                    ],
                    |row| row.get(0),
                )
                .optional()
                .map_err(into_message_err)?;

            Ok(UnreadSummary {
                count: usize::try_from(count).unwrap_or_default(),
                first_unread: first_unread.map(MessageId::new),
            })
        })
    }

    fn latest_message(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Message>, MessageError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT * FROM messages WHERE conversation_id = ?
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
                params![conversation_id.as_str()],
                db::row_to_message,
            )
            .optional()
            .map_err(into_message_err)
        })
    }

    fn delete_message(&self, message_id: &MessageId) -> Result<bool, MessageError> {
        self.with_connection(|conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM messages WHERE id = ?",
                    params![message_id.as_str()],
                )
                .map_err(into_message_err)?;
            Ok(deleted > 0)
        })
    }
}
