//! Implementation of OutboxStorage trait for SQLite storage.

use murmur_storage_traits::messages::error::MessageError;
use murmur_storage_traits::messages::types::Message;
use murmur_storage_traits::outbox::OutboxStorage;
use murmur_storage_traits::outbox::types::OutboxEntry;
use murmur_storage_traits::{ProvisionalId, Timestamp};
use rusqlite::{Connection, OptionalExtension, params};

use crate::messages::{insert_message, into_message_err};
use crate::{MurmurSqliteStorage, db};

fn insert_or_replace_entry(conn: &Connection, entry: &OutboxEntry) -> Result<(), MessageError> {
    conn.execute(
        "INSERT OR REPLACE INTO outbox
         (provisional_id, conversation_id, attempts, next_attempt_at, last_error, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            entry.provisional_id.as_str(),
            entry.conversation_id.as_str(),
            entry.attempts,
            entry.next_attempt_at.as_millis(),
            &entry.last_error,
            entry.created_at.as_millis(),
        ],
    )
    .map_err(|e| {
        if db::is_foreign_key_violation(&e) {
            MessageError::NotFound
        } else {
            into_message_err(e)
        }
    })?;
    Ok(())
}

fn find_entry(
    conn: &Connection,
    provisional_id: &ProvisionalId,
) -> Result<Option<OutboxEntry>, MessageError> {
    conn.query_row(
        "SELECT * FROM outbox WHERE provisional_id = ?",
        params![provisional_id.as_str()],
        db::row_to_outbox_entry,
    )
    .optional()
    .map_err(into_message_err)
}

impl OutboxStorage for MurmurSqliteStorage {
    fn save_pending_send(&self, message: Message, entry: OutboxEntry) -> Result<(), MessageError> {
        if message.provisional_id.as_ref() != Some(&entry.provisional_id) {
            return Err(MessageError::InvalidParameters(
                "Outbox entry does not match the message provisional id".to_string(),
            ));
        }

        self.with_savepoint("murmur_save_pending_send", into_message_err, |conn| {
            insert_message(conn, &message)?;
            insert_or_replace_entry(conn, &entry)
        })
    }

    fn save_outbox_entry(&self, entry: OutboxEntry) -> Result<(), MessageError> {
        self.with_savepoint("murmur_save_outbox_entry", into_message_err, |conn| {
            let message_exists = conn
                .query_row(
                    "SELECT 1 FROM messages WHERE provisional_id = ?",
                    params![entry.provisional_id.as_str()],
                    |_| Ok(()),
                )
                .optional()
                .map_err(into_message_err)?
                .is_some();
            if !message_exists {
                return Err(MessageError::NotFound);
            }
            insert_or_replace_entry(conn, &entry)
        })
    }

    fn due_outbox_entries(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, MessageError> {
        let limit =
            i64::try_from(limit).map_err(|e| MessageError::InvalidParameters(e.to_string()))?;

        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM outbox WHERE next_attempt_at <= ?
                     ORDER BY next_attempt_at ASC, created_at ASC
                     LIMIT ?",
                )
                .map_err(into_message_err)?;

            let rows = stmt
                .query_map(params![now.as_millis(), limit], db::row_to_outbox_entry)
                .map_err(into_message_err)?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(into_message_err)
        })
    }

    fn find_outbox_entry(
        &self,
        provisional_id: &ProvisionalId,
    ) -> Result<Option<OutboxEntry>, MessageError> {
        self.with_connection(|conn| find_entry(conn, provisional_id))
    }

    fn record_send_failure(
        &self,
        provisional_id: &ProvisionalId,
        next_attempt_at: Timestamp,
        error: &str,
    ) -> Result<OutboxEntry, MessageError> {
        self.with_savepoint("murmur_record_send_failure", into_message_err, |conn| {
            let updated = conn
                .execute(
                    "UPDATE outbox
                     SET attempts = attempts + 1, next_attempt_at = ?, last_error = ?
                     WHERE provisional_id = ?",
                    params![next_attempt_at.as_millis(), error, provisional_id.as_str()],
                )
                .map_err(into_message_err)?;

            if updated == 0 {
                return Err(MessageError::NotFound);
            }

            find_entry(conn, provisional_id)?.ok_or(MessageError::NotFound)
        })
    }

    fn remove_outbox_entry(&self, provisional_id: &ProvisionalId) -> Result<bool, MessageError> {
        self.with_connection(|conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM outbox WHERE provisional_id = ?",
                    params![provisional_id.as_str()],
                )
                .map_err(into_message_err)?;
            Ok(deleted > 0)
        })
    }

    fn outbox_entries(&self) -> Result<Vec<OutboxEntry>, MessageError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM outbox ORDER BY created_at ASC, provisional_id ASC")
                .map_err(into_message_err)?;

            let rows = stmt
                .query_map([], db::row_to_outbox_entry)
                .map_err(into_message_err)?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(into_message_err)
        })
    }
}
