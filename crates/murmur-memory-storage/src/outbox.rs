//! Memory-based storage implementation of the OutboxStorage trait

use murmur_storage_traits::messages::error::MessageError;
use murmur_storage_traits::messages::types::Message;
use murmur_storage_traits::outbox::OutboxStorage;
use murmur_storage_traits::outbox::types::OutboxEntry;
use murmur_storage_traits::{ProvisionalId, Timestamp};

use crate::MurmurMemoryStorage;
use crate::messages::insert_message;

impl OutboxStorage for MurmurMemoryStorage {
    fn save_pending_send(&self, message: Message, entry: OutboxEntry) -> Result<(), MessageError> {
        if message.provisional_id.as_ref() != Some(&entry.provisional_id) {
            return Err(MessageError::InvalidParameters(
                "Outbox entry does not match the message provisional id".to_string(),
            ));
        }

        // Both rows are written under one write lock
        let mut tables = self.inner.write();
        insert_message(&mut tables, message)?;
        tables.outbox.insert(entry.provisional_id.clone(), entry);
        Ok(())
    }

    fn save_outbox_entry(&self, entry: OutboxEntry) -> Result<(), MessageError> {
        let mut tables = self.inner.write();
        if !tables.provisional_index.contains_key(&entry.provisional_id) {
            return Err(MessageError::NotFound);
        }
        tables.outbox.insert(entry.provisional_id.clone(), entry);
        Ok(())
    }

    fn due_outbox_entries(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, MessageError> {
        let tables = self.inner.read();
        let mut due: Vec<OutboxEntry> = tables
            .outbox
            .values()
            .filter(|entry| entry.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.next_attempt_at
                .cmp(&b.next_attempt_at)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        due.truncate(limit);
        Ok(due)
    }

    fn find_outbox_entry(
        &self,
        provisional_id: &ProvisionalId,
    ) -> Result<Option<OutboxEntry>, MessageError> {
        Ok(self.inner.read().outbox.get(provisional_id).cloned())
    }

    fn record_send_failure(
        &self,
        provisional_id: &ProvisionalId,
        next_attempt_at: Timestamp,
        error: &str,
    ) -> Result<OutboxEntry, MessageError> {
        let mut tables = self.inner.write();
        let entry = tables
            .outbox
            .get_mut(provisional_id)
            .ok_or(MessageError::NotFound)?;
        entry.attempts = entry.attempts.saturating_add(1);
        entry.next_attempt_at = next_attempt_at;
        entry.last_error = Some(error.to_string());
        Ok(entry.clone())
    }

    fn remove_outbox_entry(&self, provisional_id: &ProvisionalId) -> Result<bool, MessageError> {
        Ok(self.inner.write().outbox.remove(provisional_id).is_some())
    }

    fn outbox_entries(&self) -> Result<Vec<OutboxEntry>, MessageError> {
        let tables = self.inner.read();
        let mut entries: Vec<OutboxEntry> = tables.outbox.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.provisional_id.cmp(&b.provisional_id))
        });
        Ok(entries)
    }
}
