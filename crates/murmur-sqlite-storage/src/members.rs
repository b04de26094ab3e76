//! Implementation of MemberStorage trait for SQLite storage.

use murmur_storage_traits::members::MemberStorage;
use murmur_storage_traits::members::error::MemberError;
use murmur_storage_traits::members::types::{Member, Watermark};
use murmur_storage_traits::{ConversationId, UserId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{MurmurSqliteStorage, db};

#[inline]
fn into_member_err<T>(e: T) -> MemberError
where
    T: std::error::Error,
{
    MemberError::DatabaseError(e.to_string())
}

fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, MemberError> {
    conn.query_row(sql, params![id], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
        .map_err(into_member_err)
}

fn stored_watermark(
    conn: &Connection,
    conversation_id: &ConversationId,
    user_id: &UserId,
) -> Result<Option<Option<Watermark>>, MemberError> {
    conn.query_row(
        "SELECT last_read_at, last_read_message_id FROM members
         WHERE conversation_id = ? AND user_id = ?",
        params![conversation_id.as_str(), user_id.as_str()],
        db::row_to_watermark,
    )
    .optional()
    .map_err(into_member_err)
}

fn write_watermark(
    conn: &Connection,
    conversation_id: &ConversationId,
    user_id: &UserId,
    watermark: &Watermark,
) -> Result<(), MemberError> {
    conn.execute(
        "UPDATE members SET last_read_at = ?, last_read_message_id = ?
         WHERE conversation_id = ? AND user_id = ?",
        params![
            watermark.at.as_millis(),
            watermark.message_id.as_str(),
            conversation_id.as_str(),
            user_id.as_str(),
        ],
    )
    .map_err(into_member_err)?;
    Ok(())
}

impl MemberStorage for MurmurSqliteStorage {
    fn save_member(&self, member: Member) -> Result<(), MemberError> {
        self.with_savepoint("murmur_save_member", into_member_err, |conn| {
            let conversation_exists = row_exists(
                conn,
                "SELECT 1 FROM conversations WHERE id = ?",
                member.conversation_id.as_str(),
            )?;
            let user_exists = row_exists(
                conn,
                "SELECT 1 FROM users WHERE id = ?",
                member.user_id.as_str(),
            )?;
            if !conversation_exists || !user_exists {
                return Err(MemberError::MissingParent {
                    conversation: !conversation_exists,
                    user: !user_exists,
                });
            }

            conn.execute(
                "INSERT INTO members (conversation_id, user_id, role) VALUES (?, ?, ?)
                 ON CONFLICT(conversation_id, user_id) DO UPDATE SET role = excluded.role",
                params![
                    member.conversation_id.as_str(),
                    member.user_id.as_str(),
                    member.role.as_str(),
                ],
            )
            .map_err(|e| {
                if db::is_foreign_key_violation(&e) {
                    MemberError::MissingParent {
                        conversation: false,
                        user: false,
                    }
                } else {
                    into_member_err(e)
                }
            })?;

            if let Some(incoming) = &member.last_read {
                let current = stored_watermark(conn, &member.conversation_id, &member.user_id)?
                    .flatten();
                if incoming.is_newer_than(current.as_ref()) {
                    write_watermark(conn, &member.conversation_id, &member.user_id, incoming)?;
                }
            }

            Ok(())
        })
    }

    fn find_member(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Option<Member>, MemberError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM members WHERE conversation_id = ? AND user_id = ?")
                .map_err(into_member_err)?;

            stmt.query_row(
                params![conversation_id.as_str(), user_id.as_str()],
                db::row_to_member,
            )
            .optional()
            .map_err(into_member_err)
        })
    }

    fn members(&self, conversation_id: &ConversationId) -> Result<Vec<Member>, MemberError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM members WHERE conversation_id = ? ORDER BY user_id ASC")
                .map_err(into_member_err)?;

            let rows = stmt
                .query_map(params![conversation_id.as_str()], db::row_to_member)
                .map_err(into_member_err)?;

            rows.collect::<Result<Vec<_>, _>>().map_err(into_member_err)
        })
    }

    fn advance_watermark(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        watermark: Watermark,
    ) -> Result<bool, MemberError> {
        self.with_savepoint("murmur_advance_watermark", into_member_err, |conn| {
            let current = stored_watermark(conn, conversation_id, user_id)?
                .ok_or(MemberError::NotFound)?;

            if !watermark.is_newer_than(current.as_ref()) {
                return Ok(false);
            }

            write_watermark(conn, conversation_id, user_id, &watermark)?;
            Ok(true)
        })
    }

    fn watermark(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Option<Watermark>, MemberError> {
        self.with_connection(|conn| {
            Ok(stored_watermark(conn, conversation_id, user_id)?.flatten())
        })
    }
}
