//! Memory-based storage implementation of the MessageStorage trait

use murmur_storage_traits::messages::error::MessageError;
use murmur_storage_traits::messages::types::{DeliveryState, Message, UnreadSummary};
use murmur_storage_traits::messages::{MessageStorage, Pagination};
use murmur_storage_traits::{
    CanonicalId, ConversationId, MessageId, ProvisionalId, Timestamp, UserId,
};

use crate::{MAX_MESSAGE_CONTENT_SIZE, MurmurMemoryStorage, Tables, validate_string_length};

/// Insert a message row with the same checks, in the same order, as the SQLite backend.
pub(crate) fn insert_message(tables: &mut Tables, message: Message) -> Result<(), MessageError> {
    validate_string_length(&message.content, MAX_MESSAGE_CONTENT_SIZE, "Message content")
        .map_err(MessageError::InvalidParameters)?;

    if !tables.conversations.contains_key(&message.conversation_id) {
        return Err(MessageError::MissingConversation);
    }

    if tables.messages.contains_key(&message.id) {
        return Err(MessageError::AlreadyExists);
    }
    if let Some(provisional_id) = &message.provisional_id {
        if tables.provisional_index.contains_key(provisional_id) {
            return Err(MessageError::AlreadyExists);
        }
        tables
            .provisional_index
            .insert(provisional_id.clone(), message.id.clone());
    }

    tables.messages.insert(message.id.clone(), message);
    Ok(())
}

fn sorted_newest_first<'a, I>(messages: I) -> Vec<Message>
where
    I: Iterator<Item = &'a Message>,
{
    let mut messages: Vec<Message> = messages.cloned().collect();
    messages.sort_by(|a, b| b.display_order_cmp(a));
    messages
}

impl MessageStorage for MurmurMemoryStorage {
    fn save_message(&self, message: Message) -> Result<(), MessageError> {
        insert_message(&mut self.inner.write(), message)
    }

    fn find_message(&self, message_id: &MessageId) -> Result<Option<Message>, MessageError> {
        Ok(self.inner.read().messages.get(message_id).cloned())
    }

    fn find_message_by_provisional_id(
        &self,
        provisional_id: &ProvisionalId,
    ) -> Result<Option<Message>, MessageError> {
        let tables = self.inner.read();
        Ok(tables
            .provisional_index
            .get(provisional_id)
            .and_then(|id| tables.messages.get(id))
            .cloned())
    }

    fn find_unconfirmed_by_signature(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<Message>, MessageError> {
        let tables = self.inner.read();
        let mut matches = sorted_newest_first(tables.messages.values().filter(|m| {
            &m.conversation_id == conversation_id
                && &m.sender_id == sender_id
                && m.content == content
                && m.created_at >= from
                && m.created_at <= to
                && m.state.is_unconfirmed()
        }));
        matches.reverse();
        Ok(matches)
    }

    fn relabel_message(
        &self,
        provisional_id: &ProvisionalId,
        canonical_id: &CanonicalId,
        server_created_at: Timestamp,
    ) -> Result<Message, MessageError> {
        let canonical_key = MessageId::from(canonical_id);
        let mut tables = self.inner.write();

        let provisional_key = tables.provisional_index.get(provisional_id).cloned();
        let canonical_exists = tables.messages.contains_key(&canonical_key);

        if let Some(key) = &provisional_key {
            let confirmed = tables
                .messages
                .get(key)
                .is_some_and(|row| !row.state.is_unconfirmed());
            if *key != canonical_key && confirmed {
                return Err(MessageError::AlreadyConfirmed);
            }
        }

        match provisional_key {
            None if !canonical_exists => return Err(MessageError::NotFound),
            Some(key) if key == canonical_key => {}
            Some(key) if canonical_exists => {
                // Another path already wrote the canonical row: keep that one.
                tables.remove_message(&key);
                if let Some(canonical) = tables.messages.get_mut(&canonical_key) {
                    if canonical.provisional_id.is_none() {
                        canonical.provisional_id = Some(provisional_id.clone());
                        tables
                            .provisional_index
                            .insert(provisional_id.clone(), canonical_key.clone());
                    }
                }
            }
            Some(key) => {
                if let Some(mut message) = tables.messages.remove(&key) {
                    message.id = canonical_key.clone();
                    message.state = DeliveryState::Confirmed;
                    message.server_created_at = Some(server_created_at);
                    tables.messages.insert(canonical_key.clone(), message);
                    tables
                        .provisional_index
                        .insert(provisional_id.clone(), canonical_key.clone());
                }
            }
            None => {
                if let Some(canonical) = tables.messages.get_mut(&canonical_key) {
                    if canonical.provisional_id.is_none() {
                        canonical.provisional_id = Some(provisional_id.clone());
                        tables
                            .provisional_index
                            .insert(provisional_id.clone(), canonical_key.clone());
                    }
                }
            }
        }

        tables.outbox.remove(provisional_id);

        tables
            .messages
            .get(&canonical_key)
            .cloned()
            .ok_or(MessageError::NotFound)
    }

    fn set_message_state(
        &self,
        message_id: &MessageId,
        state: DeliveryState,
    ) -> Result<(), MessageError> {
        let mut tables = self.inner.write();
        let message = tables
            .messages
            .get_mut(message_id)
            .ok_or(MessageError::NotFound)?;
        message.state = state;
        Ok(())
    }

    fn messages(
        &self,
        conversation_id: &ConversationId,
        pagination: Option<Pagination>,
    ) -> Result<Vec<Message>, MessageError> {
        let pagination = pagination.unwrap_or_default();
        pagination.validate()?;

        let tables = self.inner.read();
        let messages = sorted_newest_first(
            tables
                .messages
                .values()
                .filter(|m| &m.conversation_id == conversation_id),
        );

        Ok(messages
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.limit())
            .collect())
    }

    fn unread_after(
        &self,
        conversation_id: &ConversationId,
        after: Timestamp,
        exclude_sender: &UserId,
    ) -> Result<UnreadSummary, MessageError> {
        let tables = self.inner.read();
        let unread = sorted_newest_first(tables.messages.values().filter(|m| {
            &m.conversation_id == conversation_id
                && m.created_at > after
                && &m.sender_id != exclude_sender
        }));

        Ok(UnreadSummary {
            count: unread.len(),
            first_unread: unread.last().map(|m| m.id.clone()),
        })
    }

    fn latest_message(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Message>, MessageError> {
        let tables = self.inner.read();
        Ok(tables
            .messages
            .values()
            .filter(|m| &m.conversation_id == conversation_id)
            .max_by(|a, b| a.display_order_cmp(b))
            .cloned())
    }

    fn delete_message(&self, message_id: &MessageId) -> Result<bool, MessageError> {
        Ok(self.inner.write().remove_message(message_id).is_some())
    }
}
