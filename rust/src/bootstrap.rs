//! Initial load from the remote authority.
//!
//! Seeds the local user, then for every conversation the user belongs to:
//! the conversation row, the other members and their users, the local user's
//! own membership, the read watermark and the newest messages. Bootstrap also
//! stands in for catch-up on a fresh process, since the death timestamp is not
//! kept across restarts.

use std::collections::BTreeSet;
use std::sync::Arc;

use murmur_storage_traits::conversations::types::User;
use murmur_storage_traits::members::types::Member;
use murmur_storage_traits::{ConversationId, SyncStorageProvider, Timestamp};

use crate::arbiter::{DeliveryArbiter, Source};
use crate::config::SyncConfig;
use crate::connection::ConnectionStatus;
use crate::error::SyncError;
use crate::integrity::Integrity;
use crate::read_status::ReadTracker;
use crate::remote::{with_timeout, RemoteAuthority};
use crate::updates::{SyncUpdate, UpdateHub};

/// What a bootstrap pass brought in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub conversations: usize,
    pub messages: usize,
    /// Parked messages that could be written once their conversation arrived
    pub replayed: usize,
}

pub struct Bootstrapper<S> {
    storage: Arc<S>,
    remote: Arc<dyn RemoteAuthority>,
    integrity: Arc<Integrity<S>>,
    tracker: Arc<ReadTracker<S>>,
    arbiter: Arc<DeliveryArbiter<S>>,
    status: Arc<ConnectionStatus>,
    updates: Arc<UpdateHub>,
    self_user: User,
    config: SyncConfig,
}

impl<S> Bootstrapper<S>
where
    S: SyncStorageProvider + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<S>,
        remote: Arc<dyn RemoteAuthority>,
        integrity: Arc<Integrity<S>>,
        tracker: Arc<ReadTracker<S>>,
        arbiter: Arc<DeliveryArbiter<S>>,
        status: Arc<ConnectionStatus>,
        updates: Arc<UpdateHub>,
        self_user: User,
        config: SyncConfig,
    ) -> Self {
        Self {
            storage,
            remote,
            integrity,
            tracker,
            arbiter,
            status,
            updates,
            self_user,
            config,
        }
    }

    pub async fn run(&self) -> Result<BootstrapReport, SyncError> {
        let timeout = self.config.request_timeout();
        self.integrity.seed_local_user(&self.self_user)?;

        let before = self.conversation_ids()?;
        let conversations =
            with_timeout(timeout, self.remote.conversations(&self.self_user.id)).await?;

        let mut report = BootstrapReport::default();
        for conversation in conversations {
            let conversation_id = conversation.id.clone();
            self.integrity.save_conversation(conversation)?;
            self.ensure_self_member(&conversation_id)?;
            self.load_members(&conversation_id).await?;

            if let Err(e) = self.tracker.reconcile_with_remote(&conversation_id).await {
                tracing::warn!(conversation = %conversation_id, %e, "bootstrap: watermark unavailable");
            }
            report.messages += self.load_recent(&conversation_id).await?;
            report.conversations += 1;
        }

        report.replayed = self.replay_deferred();

        if self.conversation_ids()? != before {
            self.status.request_resubscribe();
            self.updates.publish(SyncUpdate::ConversationsChanged);
        }
        Ok(report)
    }

    fn ensure_self_member(&self, conversation_id: &ConversationId) -> Result<(), SyncError> {
        let existing = self
            .storage
            .find_member(conversation_id, &self.self_user.id)?;
        if existing.is_none() {
            self.integrity.save_member_or_defer(Member::new(
                conversation_id.clone(),
                self.self_user.id.clone(),
            ))?;
        }
        Ok(())
    }

    async fn load_members(&self, conversation_id: &ConversationId) -> Result<(), SyncError> {
        let members = with_timeout(
            self.config.request_timeout(),
            self.remote
                .other_members(conversation_id, &self.self_user.id),
        )
        .await;
        let members = match members {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(conversation = %conversation_id, %e, "bootstrap: members unavailable");
                return Ok(());
            }
        };

        for remote_member in members {
            let mut member = Member::new(conversation_id.clone(), remote_member.user.id.clone());
            member.role = remote_member.role;
            self.integrity.save_user(remote_member.user)?;
            self.integrity.save_member_or_defer(member)?;
        }
        Ok(())
    }

    async fn load_recent(&self, conversation_id: &ConversationId) -> Result<usize, SyncError> {
        let started = Timestamp::now();
        let recent = with_timeout(
            self.config.request_timeout(),
            self.remote
                .recent_messages(conversation_id, self.config.bootstrap_message_count),
        )
        .await;
        match recent {
            Ok(messages) => {
                let inserted = self.arbiter.observe_all(messages, Source::Bootstrap);
                self.storage.set_last_synced_at(conversation_id, started)?;
                Ok(inserted)
            }
            Err(e) => {
                tracing::warn!(conversation = %conversation_id, %e, "bootstrap: messages unavailable");
                Ok(0)
            }
        }
    }

    /// Retry messages parked because their conversation was unknown.
    pub fn replay_deferred(&self) -> usize {
        let deferred = self.integrity.take_deferred_messages();
        if deferred.is_empty() {
            return 0;
        }
        let count = deferred.len();
        let inserted = self.arbiter.observe_all(deferred, Source::CatchUp);
        tracing::debug!(count, inserted, "replayed deferred messages");
        inserted
    }

    fn conversation_ids(&self) -> Result<BTreeSet<ConversationId>, SyncError> {
        Ok(self
            .storage
            .all_conversations()?
            .into_iter()
            .map(|c| c.id)
            .collect())
    }
}
