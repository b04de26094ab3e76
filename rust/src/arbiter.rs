//! The delivery arbiter.
//!
//! Every observed message goes through [`DeliveryArbiter::observe`], whichever
//! path delivered it (live channel, wake payload, targeted fetch, catch-up scan,
//! bootstrap or this device's own send acknowledgement). Matching runs in
//! priority order:
//!
//! 1. canonical id already stored: duplicate;
//! 2. provisional id echoed back and held locally by a row that is still
//!    unconfirmed: relabel that row;
//! 3. an unconfirmed local row with the same signature (sender, content,
//!    created-at truncated to the dedup granularity, within the dedup window):
//!    relabel that row;
//! 4. otherwise insert.
//!
//! Work is serialized per canonical id. The store's uniqueness constraint is the
//! backstop: losing an insert race folds into [`Outcome::Duplicate`].

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use murmur_storage_traits::messages::error::MessageError;
use murmur_storage_traits::messages::types::Message;
use murmur_storage_traits::{CanonicalId, MessageId, ProvisionalId, SyncStorageProvider};
use parking_lot::Mutex;

use crate::error::SyncError;
use crate::integrity::Integrity;
use crate::read_status::ReadTracker;
use crate::remote::{RemoteMessage, WriteAck};
use crate::updates::{SyncUpdate, UpdateHub};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Live,
    Wake,
    CatchUp,
    Bootstrap,
    OwnSend,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Live => "live",
            Source::Wake => "wake",
            Source::CatchUp => "catch_up",
            Source::Bootstrap => "bootstrap",
            Source::OwnSend => "own_send",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Genuinely new; a row was inserted
    Inserted,
    /// Matched a local pending row, which now carries the canonical id
    Relabeled { provisional_id: ProvisionalId },
    /// Already stored
    Duplicate,
    /// The conversation is not known locally yet; parked for replay
    Deferred,
}

/// One mutex per key, created on demand and dropped when unused.
struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn with_lock<R>(&self, key: &K, f: impl FnOnce() -> R) -> R {
        let lock = self.locks.lock().entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock();
            f()
        };

        let mut locks = self.locks.lock();
        // The map and this function hold the only references
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

pub struct DeliveryArbiter<S> {
    storage: Arc<S>,
    integrity: Arc<Integrity<S>>,
    tracker: Arc<ReadTracker<S>>,
    updates: Arc<UpdateHub>,
    locks: KeyedLocks<CanonicalId>,
    dedup_window: Duration,
    dedup_granularity: Duration,
}

impl<S> DeliveryArbiter<S>
where
    S: SyncStorageProvider,
{
    pub fn new(
        storage: Arc<S>,
        integrity: Arc<Integrity<S>>,
        tracker: Arc<ReadTracker<S>>,
        updates: Arc<UpdateHub>,
        dedup_window: Duration,
        dedup_granularity: Duration,
    ) -> Self {
        Self {
            storage,
            integrity,
            tracker,
            updates,
            locks: KeyedLocks::new(),
            dedup_window,
            dedup_granularity,
        }
    }

    pub fn observe(&self, message: RemoteMessage, source: Source) -> Result<Outcome, SyncError> {
        let outcome = self
            .locks
            .with_lock(&message.id, || self.merge(&message))?;

        tracing::debug!(
            message = %message.id,
            conversation = %message.conversation_id,
            source = source.as_str(),
            ?outcome,
            "observed message"
        );

        match &outcome {
            Outcome::Inserted => {
                self.updates.publish(SyncUpdate::MessageInserted {
                    conversation_id: message.conversation_id.clone(),
                    message_id: MessageId::from(message.id),
                });
                self.tracker.on_message_arrived(&message.to_local())?;
            }
            Outcome::Relabeled { provisional_id } => {
                self.updates.publish(SyncUpdate::MessageRelabeled {
                    conversation_id: message.conversation_id.clone(),
                    provisional_id: provisional_id.clone(),
                    canonical_id: message.id,
                });
            }
            Outcome::Duplicate | Outcome::Deferred => {}
        }
        Ok(outcome)
    }

    /// Observe a batch. Failures are logged and skipped. Returns how many rows
    /// were inserted.
    pub fn observe_all(&self, messages: Vec<RemoteMessage>, source: Source) -> usize {
        let mut inserted = 0;
        for message in messages {
            let id = message.id;
            match self.observe(message, source) {
                Ok(Outcome::Inserted) => inserted += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(message = %id, source = source.as_str(), %e, "observe failed");
                }
            }
        }
        inserted
    }

    /// Apply the authority's acknowledgement of this device's own send.
    /// Returns the confirmed row.
    pub fn confirm_own_send(
        &self,
        provisional_id: &ProvisionalId,
        ack: WriteAck,
    ) -> Result<Message, SyncError> {
        let key = MessageId::from(ack.id);
        let twin = self.storage.find_message_by_provisional_id(provisional_id)?;
        if let Some(twin) = twin.filter(|row| row.id != key && !row.state.is_unconfirmed()) {
            return self.store_second_commit(provisional_id, twin, ack);
        }

        let (message, relabeled) = self.locks.with_lock(&ack.id, || -> Result<_, SyncError> {
            if let Some(row) = self.storage.find_message_by_provisional_id(provisional_id)? {
                if row.id == key {
                    // Another path confirmed it first
                    return Ok((row, false));
                }
            }
            let row = self
                .storage
                .relabel_message(provisional_id, &ack.id, ack.created_at)?;
            Ok((row, true))
        })?;

        if relabeled {
            tracing::debug!(
                provisional = %provisional_id,
                canonical = %ack.id,
                source = Source::OwnSend.as_str(),
                "send confirmed"
            );
            self.updates.publish(SyncUpdate::MessageRelabeled {
                conversation_id: message.conversation_id.clone(),
                provisional_id: provisional_id.clone(),
                canonical_id: ack.id,
            });
        }
        Ok(message)
    }

    /// The authority committed one send twice (a retry after a lost
    /// acknowledgement). Both server rows are kept locally.
    fn store_second_commit(
        &self,
        provisional_id: &ProvisionalId,
        twin: Message,
        ack: WriteAck,
    ) -> Result<Message, SyncError> {
        tracing::warn!(
            provisional = %provisional_id,
            first = %twin.id,
            second = %ack.id,
            "send committed under a second id"
        );
        let mut second = RemoteMessage::new(
            ack.id,
            twin.conversation_id,
            twin.sender_id,
            twin.content,
            ack.created_at,
        );
        second.message_type = twin.message_type;
        second.parent_id = twin.parent_id;
        second.image_url = twin.image_url;
        self.observe(second, Source::OwnSend)?;

        let stored = self.storage.find_message(&MessageId::from(ack.id))?;
        Ok(stored.ok_or(MessageError::NotFound)?)
    }

    fn merge(&self, message: &RemoteMessage) -> Result<Outcome, SyncError> {
        let key = MessageId::from(message.id);

        // Only a row still waiting for its acknowledgement may take this id
        let mut pending_twin = None;
        let mut echoes_confirmed_send = false;
        if let Some(provisional_id) = &message.provisional_id {
            if let Some(twin) = self.storage.find_message_by_provisional_id(provisional_id)? {
                if twin.id != key && twin.state.is_unconfirmed() {
                    pending_twin = Some(provisional_id.clone());
                } else if twin.id != key {
                    echoes_confirmed_send = true;
                }
            }
        }

        if self.storage.find_message(&key)?.is_some() {
            // A pending twin survives when another path stored the canonical row first
            if let Some(provisional_id) = pending_twin {
                self.relabel(&provisional_id, message)?;
                return Ok(Outcome::Relabeled { provisional_id });
            }
            return Ok(Outcome::Duplicate);
        }

        if let Some(provisional_id) = pending_twin {
            self.relabel(&provisional_id, message)?;
            return Ok(Outcome::Relabeled { provisional_id });
        }

        if echoes_confirmed_send {
            tracing::debug!(
                message = %message.id,
                "send already confirmed under another id, storing as its own row"
            );
        } else if let Some(provisional_id) = self.signature_match(message)? {
            self.relabel(&provisional_id, message)?;
            return Ok(Outcome::Relabeled { provisional_id });
        }

        match self.storage.save_message(message.to_local()) {
            Ok(()) => Ok(Outcome::Inserted),
            Err(MessageError::AlreadyExists) => Ok(Outcome::Duplicate),
            Err(MessageError::MissingConversation) => {
                tracing::info!(
                    message = %message.id,
                    conversation = %message.conversation_id,
                    "conversation not stored yet, deferring message"
                );
                self.integrity.defer_message(message.clone());
                Ok(Outcome::Deferred)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn relabel(
        &self,
        provisional_id: &ProvisionalId,
        message: &RemoteMessage,
    ) -> Result<Message, SyncError> {
        Ok(self
            .storage
            .relabel_message(provisional_id, &message.id, message.created_at)?)
    }

    /// The closest unconfirmed local row with the same dedup signature.
    fn signature_match(&self, message: &RemoteMessage) -> Result<Option<ProvisionalId>, SyncError> {
        let granularity = self.dedup_granularity;
        let arrival = message.created_at.truncate(granularity);
        let from = arrival.saturating_sub(self.dedup_window);
        let to = arrival
            .saturating_add(self.dedup_window)
            .saturating_add(granularity.max(Duration::from_millis(1)))
            .saturating_sub(Duration::from_millis(1));

        let candidates = self.storage.find_unconfirmed_by_signature(
            &message.conversation_id,
            &message.sender_id,
            &message.content,
            from,
            to,
        )?;

        Ok(candidates
            .into_iter()
            .filter_map(|row| {
                let distance = row.created_at.truncate(granularity).abs_diff(arrival);
                row.provisional_id.map(|p| (distance, p))
            })
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, provisional_id)| provisional_id))
    }

    #[cfg(test)]
    fn held_locks(&self) -> usize {
        self.locks.len()
    }
}
