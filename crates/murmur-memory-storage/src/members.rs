//! Memory-based storage implementation of the MemberStorage trait

use murmur_storage_traits::members::MemberStorage;
use murmur_storage_traits::members::error::MemberError;
use murmur_storage_traits::members::types::{Member, Watermark};
use murmur_storage_traits::{ConversationId, UserId};

use crate::MurmurMemoryStorage;

impl MemberStorage for MurmurMemoryStorage {
    fn save_member(&self, member: Member) -> Result<(), MemberError> {
        let mut tables = self.inner.write();

        let conversation_exists = tables.conversations.contains_key(&member.conversation_id);
        let user_exists = tables.users.contains_key(&member.user_id);
        if !conversation_exists || !user_exists {
            return Err(MemberError::MissingParent {
                conversation: !conversation_exists,
                user: !user_exists,
            });
        }

        let key = (member.conversation_id.clone(), member.user_id.clone());
        match tables.members.get_mut(&key) {
            Some(existing) => {
                existing.role = member.role;
                if let Some(incoming) = member.last_read {
                    if incoming.is_newer_than(existing.last_read.as_ref()) {
                        existing.last_read = Some(incoming);
                    }
                }
            }
            None => {
                tables.members.insert(key, member);
            }
        }
        Ok(())
    }

    fn find_member(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Option<Member>, MemberError> {
        let key = (conversation_id.clone(), user_id.clone());
        Ok(self.inner.read().members.get(&key).cloned())
    }

    fn members(&self, conversation_id: &ConversationId) -> Result<Vec<Member>, MemberError> {
        Ok(self
            .inner
            .read()
            .members
            .values()
            .filter(|member| &member.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    fn advance_watermark(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        watermark: Watermark,
    ) -> Result<bool, MemberError> {
        let key = (conversation_id.clone(), user_id.clone());
        let mut tables = self.inner.write();
        let member = tables.members.get_mut(&key).ok_or(MemberError::NotFound)?;

        if !watermark.is_newer_than(member.last_read.as_ref()) {
            return Ok(false);
        }
        member.last_read = Some(watermark);
        Ok(true)
    }

    fn watermark(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Option<Watermark>, MemberError> {
        let key = (conversation_id.clone(), user_id.clone());
        Ok(self
            .inner
            .read()
            .members
            .get(&key)
            .and_then(|member| member.last_read.clone()))
    }
}
