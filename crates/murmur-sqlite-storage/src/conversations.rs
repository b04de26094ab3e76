//! Implementation of ConversationStorage trait for SQLite storage.

use murmur_storage_traits::conversations::ConversationStorage;
use murmur_storage_traits::conversations::error::ConversationError;
use murmur_storage_traits::conversations::types::{Conversation, User};
use murmur_storage_traits::{ConversationId, Timestamp, UserId};
use rusqlite::{OptionalExtension, params};

use crate::validation::{
    MAX_CONVERSATION_NAME_LENGTH, MAX_DISPLAY_NAME_LENGTH, validate_string_length,
};
use crate::{MurmurSqliteStorage, db};

#[inline]
fn into_conversation_err<T>(e: T) -> ConversationError
where
    T: std::error::Error,
{
    ConversationError::DatabaseError(e.to_string())
}

impl ConversationStorage for MurmurSqliteStorage {
    fn save_conversation(&self, conversation: Conversation) -> Result<(), ConversationError> {
        validate_string_length(
            &conversation.name,
            MAX_CONVERSATION_NAME_LENGTH,
            "Conversation name",
        )
        .map_err(|e| ConversationError::InvalidParameters(e.to_string()))?;

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, name, created_by, created_at, last_synced_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     created_by = excluded.created_by,
                     created_at = excluded.created_at",
                params![
                    conversation.id.as_str(),
                    &conversation.name,
                    conversation.created_by.as_ref().map(|u| u.as_str()),
                    conversation.created_at.as_millis(),
                    conversation.last_synced_at.map(|t| t.as_millis()),
                ],
            )
            .map_err(into_conversation_err)?;

            Ok(())
        })
    }

    fn find_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, ConversationError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM conversations WHERE id = ?")
                .map_err(into_conversation_err)?;

            stmt.query_row(params![conversation_id.as_str()], db::row_to_conversation)
                .optional()
                .map_err(into_conversation_err)
        })
    }

    fn all_conversations(&self) -> Result<Vec<Conversation>, ConversationError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM conversations ORDER BY id ASC")
                .map_err(into_conversation_err)?;

            let rows = stmt
                .query_map([], db::row_to_conversation)
                .map_err(into_conversation_err)?;

            let mut conversations = Vec::new();
            for row in rows {
                match row {
                    Ok(conversation) => conversations.push(conversation),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to deserialize conversation row, skipping");
                    }
                }
            }

            Ok(conversations)
        })
    }

    fn set_last_synced_at(
        &self,
        conversation_id: &ConversationId,
        synced_at: Timestamp,
    ) -> Result<(), ConversationError> {
        self.with_connection(|conn| {
            let updated = conn
                .execute(
                    "UPDATE conversations SET last_synced_at = ? WHERE id = ?",
                    params![synced_at.as_millis(), conversation_id.as_str()],
                )
                .map_err(into_conversation_err)?;

            if updated == 0 {
                return Err(ConversationError::NotFound);
            }
            Ok(())
        })
    }

    fn save_user(&self, user: User) -> Result<(), ConversationError> {
        validate_string_length(&user.display_name, MAX_DISPLAY_NAME_LENGTH, "Display name")
            .map_err(|e| ConversationError::InvalidParameters(e.to_string()))?;

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO users (id, display_name, avatar_url) VALUES (?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     display_name = excluded.display_name,
                     avatar_url = excluded.avatar_url",
                params![user.id.as_str(), &user.display_name, &user.avatar_url],
            )
            .map_err(into_conversation_err)?;

            Ok(())
        })
    }

    fn find_user(&self, user_id: &UserId) -> Result<Option<User>, ConversationError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM users WHERE id = ?")
                .map_err(into_conversation_err)?;

            stmt.query_row(params![user_id.as_str()], db::row_to_user)
                .optional()
                .map_err(into_conversation_err)
        })
    }
}
