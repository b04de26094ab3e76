//! Referential-order guards for the local store.
//!
//! A member row needs its conversation and user rows first, and a message needs
//! its conversation. Writes that arrive before their parents are parked here
//! and replayed once the parents exist, instead of failing.

use std::collections::BTreeMap;
use std::sync::Arc;

use murmur_storage_traits::conversations::types::{Conversation, User};
use murmur_storage_traits::members::error::MemberError;
use murmur_storage_traits::members::types::Member;
use murmur_storage_traits::{ConversationId, SyncStorageProvider, UserId};
use parking_lot::Mutex;

use crate::error::SyncError;
use crate::remote::RemoteMessage;

const MAX_DEFERRED_MESSAGES: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberWrite {
    Saved,
    Deferred,
}

pub struct Integrity<S> {
    storage: Arc<S>,
    deferred_members: Mutex<BTreeMap<(ConversationId, UserId), Member>>,
    deferred_messages: Mutex<Vec<RemoteMessage>>,
}

impl<S> Integrity<S>
where
    S: SyncStorageProvider,
{
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            deferred_members: Mutex::new(BTreeMap::new()),
            deferred_messages: Mutex::new(Vec::new()),
        }
    }

    /// Seed the local user. Conversation listings never return the caller, so
    /// this is the only way that row gets written.
    pub fn seed_local_user(&self, user: &User) -> Result<(), SyncError> {
        self.save_user(user.clone())?;
        tracing::debug!(user = %user.id, "seeded local user");
        Ok(())
    }

    pub fn save_user(&self, user: User) -> Result<(), SyncError> {
        self.storage.save_user(user)?;
        self.flush_deferred_members();
        Ok(())
    }

    pub fn save_conversation(&self, conversation: Conversation) -> Result<(), SyncError> {
        self.storage.save_conversation(conversation)?;
        self.flush_deferred_members();
        Ok(())
    }

    /// Save a member, or park it if its conversation or user row is missing.
    pub fn save_member_or_defer(&self, member: Member) -> Result<MemberWrite, SyncError> {
        match self.storage.save_member(member.clone()) {
            Ok(()) => Ok(MemberWrite::Saved),
            Err(MemberError::MissingParent { conversation, user }) => {
                tracing::info!(
                    conversation = %member.conversation_id,
                    user = %member.user_id,
                    missing_conversation = conversation,
                    missing_user = user,
                    "member write deferred until parents exist"
                );
                self.park_member(member);
                Ok(MemberWrite::Deferred)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn park_member(&self, member: Member) {
        let key = (member.conversation_id.clone(), member.user_id.clone());
        let mut deferred = self.deferred_members.lock();
        match deferred.get_mut(&key) {
            Some(existing) => {
                existing.role = member.role;
                if let Some(watermark) = member.last_read {
                    if watermark.is_newer_than(existing.last_read.as_ref()) {
                        existing.last_read = Some(watermark);
                    }
                }
            }
            None => {
                deferred.insert(key, member);
            }
        }
    }

    /// Retry parked members. Returns how many were written.
    pub fn flush_deferred_members(&self) -> usize {
        let parked = std::mem::take(&mut *self.deferred_members.lock());
        let mut saved = 0;
        for (_, member) in parked {
            match self.storage.save_member(member.clone()) {
                Ok(()) => saved += 1,
                Err(MemberError::MissingParent { .. }) => self.park_member(member),
                Err(e) => {
                    tracing::warn!(
                        conversation = %member.conversation_id,
                        user = %member.user_id,
                        %e,
                        "dropping deferred member"
                    );
                }
            }
        }
        if saved > 0 {
            tracing::debug!(saved, "flushed deferred members");
        }
        saved
    }

    pub fn defer_message(&self, message: RemoteMessage) {
        let mut deferred = self.deferred_messages.lock();
        if deferred.iter().any(|m| m.id == message.id) {
            return;
        }
        if deferred.len() >= MAX_DEFERRED_MESSAGES {
            // Catch-up and bootstrap fetch these again
            deferred.remove(0);
        }
        deferred.push(message);
    }

    pub fn take_deferred_messages(&self) -> Vec<RemoteMessage> {
        std::mem::take(&mut *self.deferred_messages.lock())
    }

    pub fn deferred_member_count(&self) -> usize {
        self.deferred_members.lock().len()
    }

    pub fn deferred_message_count(&self) -> usize {
        self.deferred_messages.lock().len()
    }
}
