//! Local-first read watermarks.
//!
//! `mark_read` writes the watermark to the local store and returns; pushing it
//! to the remote authority happens in a background task per conversation. A
//! newer mark for the same conversation cancels the previous push. Watermarks
//! only ever move forward, whichever side they come from.

use std::sync::Arc;

use murmur_storage_traits::members::error::MemberError;
use murmur_storage_traits::members::types::{Member, Watermark};
use murmur_storage_traits::messages::types::{Message, UnreadSummary};
use murmur_storage_traits::{ConversationId, MessageId, SyncStorageProvider, Timestamp, UserId};
use parking_lot::RwLock;
use tokio::runtime::Handle;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::integrity::{Integrity, MemberWrite};
use crate::remote::{with_timeout, RemoteAuthority};
use crate::scheduler::TaskGroup;
use crate::updates::{SyncUpdate, UpdateHub};

pub struct ReadTracker<S> {
    storage: Arc<S>,
    remote: Arc<dyn RemoteAuthority>,
    integrity: Arc<Integrity<S>>,
    updates: Arc<UpdateHub>,
    self_user: UserId,
    config: SyncConfig,
    open: RwLock<Option<ConversationId>>,
    pushes: TaskGroup<ConversationId>,
}

impl<S> ReadTracker<S>
where
    S: SyncStorageProvider,
{
    pub fn new(
        storage: Arc<S>,
        remote: Arc<dyn RemoteAuthority>,
        integrity: Arc<Integrity<S>>,
        updates: Arc<UpdateHub>,
        self_user: UserId,
        config: SyncConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            storage,
            remote,
            integrity,
            updates,
            self_user,
            config,
            open: RwLock::new(None),
            pushes: TaskGroup::new(runtime),
        }
    }

    /// Advance the local watermark, then reconcile it to the remote authority in
    /// the background. Returns whether the local watermark moved.
    pub fn mark_read(
        &self,
        conversation_id: &ConversationId,
        message_id: MessageId,
        at: Timestamp,
    ) -> Result<bool, SyncError> {
        let watermark = Watermark::new(at, message_id);
        let applied = match self.storage.advance_watermark(
            conversation_id,
            &self.self_user,
            watermark.clone(),
        ) {
            Ok(applied) => applied,
            Err(MemberError::NotFound) => {
                let mut member = Member::new(conversation_id.clone(), self.self_user.clone());
                member.last_read = Some(watermark.clone());
                self.integrity.save_member_or_defer(member)? == MemberWrite::Saved
            }
            Err(e) => return Err(e.into()),
        };

        if applied {
            tracing::debug!(
                conversation = %conversation_id,
                message = %watermark.message_id,
                "watermark advanced"
            );
            self.publish_unread(conversation_id);
            self.schedule_push(conversation_id.clone(), watermark);
        }
        Ok(applied)
    }

    /// Unread messages from others after the local watermark. Without a
    /// watermark (first open) nothing is unread.
    pub fn unread(&self, conversation_id: &ConversationId) -> Result<UnreadSummary, SyncError> {
        let Some(watermark) = self.storage.watermark(conversation_id, &self.self_user)? else {
            return Ok(UnreadSummary::default());
        };
        Ok(self
            .storage
            .unread_after(conversation_id, watermark.at, &self.self_user)?)
    }

    /// Mark `conversation_id` as the one on screen. Returns the unread state as
    /// it was when opened, for placing the separator.
    pub fn open_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<UnreadSummary, SyncError> {
        let unread = self.unread(conversation_id)?;
        *self.open.write() = Some(conversation_id.clone());
        Ok(unread)
    }

    /// Returns whether `conversation_id` was the open conversation.
    pub fn close_conversation(&self, conversation_id: &ConversationId) -> bool {
        let mut open = self.open.write();
        if open.as_ref() == Some(conversation_id) {
            *open = None;
            return true;
        }
        false
    }

    pub fn open_conversation_id(&self) -> Option<ConversationId> {
        self.open.read().clone()
    }

    /// A message reached the local store through some delivery path.
    pub fn on_message_arrived(&self, message: &Message) -> Result<(), SyncError> {
        let is_open = self.open.read().as_ref() == Some(&message.conversation_id);
        if is_open {
            // Otherwise it shows up as unread on the next open
            self.mark_read(
                &message.conversation_id,
                message.id.clone(),
                message.created_at,
            )?;
        } else if message.sender_id != self.self_user {
            self.publish_unread(&message.conversation_id);
        }
        Ok(())
    }

    /// Apply a watermark read from the remote authority, only if it is newer.
    pub fn apply_remote_watermark(
        &self,
        conversation_id: &ConversationId,
        watermark: Watermark,
    ) -> Result<bool, SyncError> {
        let applied = match self.storage.advance_watermark(
            conversation_id,
            &self.self_user,
            watermark.clone(),
        ) {
            Ok(applied) => applied,
            Err(MemberError::NotFound) => {
                let mut member = Member::new(conversation_id.clone(), self.self_user.clone());
                member.last_read = Some(watermark);
                self.integrity.save_member_or_defer(member)? == MemberWrite::Saved
            }
            Err(e) => return Err(e.into()),
        };
        if applied {
            self.publish_unread(conversation_id);
        }
        Ok(applied)
    }

    /// Pull the remote watermark and merge it; push ours back if it is newer.
    pub async fn reconcile_with_remote(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<bool, SyncError> {
        let remote = with_timeout(
            self.config.request_timeout(),
            self.remote.read_watermark(conversation_id, &self.self_user),
        )
        .await?;

        let applied = match &remote {
            Some(watermark) => self.apply_remote_watermark(conversation_id, watermark.clone())?,
            None => false,
        };

        if let Some(local) = self.storage.watermark(conversation_id, &self.self_user)? {
            if local.is_newer_than(remote.as_ref()) {
                self.schedule_push(conversation_id.clone(), local);
            }
        }
        Ok(applied)
    }

    pub fn cancel_pushes(&self) {
        self.pushes.cancel_all();
    }

    fn publish_unread(&self, conversation_id: &ConversationId) {
        match self.unread(conversation_id) {
            Ok(unread) => self.updates.publish(SyncUpdate::UnreadChanged {
                conversation_id: conversation_id.clone(),
                unread,
            }),
            Err(e) => tracing::warn!(conversation = %conversation_id, %e, "unread count failed"),
        }
    }

    fn schedule_push(&self, conversation_id: ConversationId, watermark: Watermark) {
        if !self.config.network_enabled() {
            return;
        }
        let remote = self.remote.clone();
        let user_id = self.self_user.clone();
        let timeout = self.config.request_timeout();
        let backoff = self.config.send_backoff();
        let limit = self.config.watermark_retry_limit.max(1);
        let key = conversation_id.clone();

        self.pushes.spawn(key, async move {
            for attempt in 1..=limit {
                let pushed = with_timeout(
                    timeout,
                    remote.write_watermark(&conversation_id, &user_id, &watermark),
                )
                .await;
                match pushed {
                    Ok(()) => {
                        tracing::debug!(conversation = %conversation_id, "watermark pushed");
                        return;
                    }
                    Err(e) if attempt < limit => {
                        tracing::debug!(conversation = %conversation_id, attempt, %e, "watermark push failed");
                        tokio::time::sleep(backoff.delay(attempt)).await;
                    }
                    Err(e) => {
                        tracing::warn!(conversation = %conversation_id, %e, "giving up on watermark push");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use murmur_memory_storage::MurmurMemoryStorage;
    use murmur_storage_traits::conversations::ConversationStorage;
    use murmur_storage_traits::members::MemberStorage;
    use murmur_storage_traits::messages::MessageStorage;
    use murmur_storage_traits::test_utils::{
        create_test_conversation, create_test_member, create_test_message, create_test_user,
    };

    use super::*;
    use crate::remote::InProcessAuthority;

    fn tracker(
        network: bool,
    ) -> (
        Arc<MurmurMemoryStorage>,
        InProcessAuthority,
        ReadTracker<MurmurMemoryStorage>,
    ) {
        let storage = Arc::new(MurmurMemoryStorage::new());
        let authority = InProcessAuthority::new();
        let integrity = Arc::new(Integrity::new(storage.clone()));
        integrity.seed_local_user(&create_test_user("me")).unwrap();
        integrity.save_user(create_test_user("bob")).unwrap();
        integrity
            .save_conversation(create_test_conversation("c1"))
            .unwrap();
        storage.save_member(create_test_member("c1", "me")).unwrap();

        let config = SyncConfig {
            disable_network: Some(!network),
            ..SyncConfig::default()
        };
        let tracker = ReadTracker::new(
            storage.clone(),
            Arc::new(authority.clone()),
            integrity,
            Arc::new(UpdateHub::new(4)),
            UserId::from("me"),
            config,
            Handle::current(),
        );
        (storage, authority, tracker)
    }

    #[tokio::test]
    async fn test_first_open_has_no_unread() {
        let (storage, _, tracker) = tracker(false);
        for ms in 1..=5 {
            storage
                .save_message(create_test_message("c1", "bob", "old", ms * 1_000))
                .unwrap();
        }
        let unread = tracker.open_conversation(&ConversationId::from("c1")).unwrap();
        assert_eq!(unread, UnreadSummary::default());
    }

    #[tokio::test]
    async fn test_mark_read_never_regresses() {
        let (_, _, tracker) = tracker(false);
        let c1 = ConversationId::from("c1");

        assert!(tracker
            .mark_read(&c1, MessageId::new("m5"), Timestamp::from_millis(5_000))
            .unwrap());
        assert!(!tracker
            .mark_read(&c1, MessageId::new("m2"), Timestamp::from_millis(2_000))
            .unwrap());
        assert!(!tracker
            .apply_remote_watermark(
                &c1,
                Watermark::new(Timestamp::from_millis(3_000), MessageId::new("m3"))
            )
            .unwrap());
    }

    #[tokio::test]
    async fn test_mark_read_without_member_row_creates_it() {
        let (storage, _, tracker) = tracker(false);
        let c2 = ConversationId::from("c2");
        assert!(!tracker
            .mark_read(&c2, MessageId::new("x"), Timestamp::from_millis(1))
            .unwrap());
        storage
            .save_conversation(create_test_conversation("c2"))
            .unwrap();
        assert!(tracker
            .mark_read(&c2, MessageId::new("x"), Timestamp::from_millis(1))
            .unwrap());
    }

    #[tokio::test]
    async fn test_watermark_is_pushed_in_background() {
        let (_, authority, tracker) = tracker(true);
        let c1 = ConversationId::from("c1");
        authority.add_user(create_test_user("me"));
        authority.create_conversation(create_test_conversation("c1"), &[UserId::from("me")]);

        tracker
            .mark_read(&c1, MessageId::new("m1"), Timestamp::from_millis(10))
            .unwrap();
        murmur_test_utils::wait_until("watermark pushed", std::time::Duration::from_secs(2), || {
            authority.watermark(&c1, &UserId::from("me")).is_some()
        })
        .await;
        assert_eq!(
            authority.watermark(&c1, &UserId::from("me")).unwrap().message_id,
            MessageId::new("m1")
        );
    }

    #[tokio::test]
    async fn test_reconcile_pulls_newer_remote_watermark() {
        let (storage, authority, tracker) = tracker(true);
        let c1 = ConversationId::from("c1");
        let me = UserId::from("me");
        authority.add_user(create_test_user("me"));
        authority.create_conversation(create_test_conversation("c1"), &[me.clone()]);
        authority.set_watermark(
            &c1,
            &me,
            Watermark::new(Timestamp::from_millis(9_000), MessageId::new("m9")),
        );

        assert!(tracker.reconcile_with_remote(&c1).await.unwrap());
        assert_eq!(
            storage.watermark(&c1, &me).unwrap().unwrap().message_id,
            MessageId::new("m9")
        );
        assert!(!tracker.reconcile_with_remote(&c1).await.unwrap());
    }
}
