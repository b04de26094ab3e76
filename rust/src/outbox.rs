//! Outbox and send pipeline.
//!
//! `send` only touches the local store: the pending row and its outbox entry are
//! written in one transaction and the call returns the provisional id. A drain
//! loop pushes due entries to the remote authority, one network attempt per
//! entry at a time, and reschedules failures with jittered exponential backoff.
//! Entries are never dropped on failure.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use murmur_storage_traits::messages::types::{DeliveryState, Message};
use murmur_storage_traits::outbox::types::OutboxEntry;
use murmur_storage_traits::{ConversationId, MessageId, ProvisionalId, SyncStorageProvider, Timestamp, UserId};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::arbiter::DeliveryArbiter;
use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncError};
use crate::remote::{with_timeout, NewMessage, RemoteAuthority, RemoteMessage, WriteAck};
use crate::updates::{SyncUpdate, UpdateHub};

/// What the caller wants to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: String,
    pub message_type: Option<String>,
    pub parent_id: Option<MessageId>,
    pub image_url: Option<String>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            message_type: None,
            parent_id: None,
            image_url: None,
        }
    }

    pub fn reply_to(mut self, parent_id: MessageId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }
}

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub confirmed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Confirmed,
    Failed,
    Skipped,
}

/// Releases the single-flight claim on drop.
struct Flight<'a> {
    in_flight: &'a Mutex<HashSet<ProvisionalId>>,
    provisional_id: ProvisionalId,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.provisional_id);
    }
}

pub struct Outbox<S> {
    storage: Arc<S>,
    remote: Arc<dyn RemoteAuthority>,
    arbiter: Arc<DeliveryArbiter<S>>,
    updates: Arc<UpdateHub>,
    self_user: UserId,
    config: SyncConfig,
    in_flight: Mutex<HashSet<ProvisionalId>>,
    kick: Arc<Notify>,
}

impl<S> Outbox<S>
where
    S: SyncStorageProvider + 'static,
{
    pub fn new(
        storage: Arc<S>,
        remote: Arc<dyn RemoteAuthority>,
        arbiter: Arc<DeliveryArbiter<S>>,
        updates: Arc<UpdateHub>,
        self_user: UserId,
        config: SyncConfig,
    ) -> Self {
        Self {
            storage,
            remote,
            arbiter,
            updates,
            self_user,
            config,
            in_flight: Mutex::new(HashSet::new()),
            kick: Arc::new(Notify::new()),
        }
    }

    /// Queue a message. Never waits on the network.
    pub fn send(
        &self,
        conversation_id: &ConversationId,
        outgoing: OutgoingMessage,
    ) -> Result<ProvisionalId, SyncError> {
        if outgoing.content.trim().is_empty() && outgoing.image_url.is_none() {
            return Err(SyncError::InvalidInput("message is empty".to_string()));
        }

        let provisional_id = ProvisionalId::generate();
        let now = Timestamp::now();
        let mut message = Message::pending(
            provisional_id.clone(),
            conversation_id.clone(),
            self.self_user.clone(),
            outgoing.content,
            now,
        );
        if let Some(message_type) = outgoing.message_type {
            message.message_type = message_type;
        }
        message.parent_id = outgoing.parent_id;
        message.image_url = outgoing.image_url;

        let entry = OutboxEntry::new(provisional_id.clone(), conversation_id.clone(), now);
        self.storage.save_pending_send(message, entry)?;

        tracing::debug!(conversation = %conversation_id, provisional = %provisional_id, "queued send");
        self.updates.publish(SyncUpdate::MessageInserted {
            conversation_id: conversation_id.clone(),
            message_id: MessageId::from(&provisional_id),
        });
        self.kick.notify_one();
        Ok(provisional_id)
    }

    /// Make a queued or failed send due now with a fresh attempt budget.
    pub fn retry(&self, provisional_id: &ProvisionalId) -> Result<(), SyncError> {
        let message = self
            .storage
            .find_message_by_provisional_id(provisional_id)?
            .filter(|m| m.state.is_unconfirmed())
            .ok_or_else(|| SyncError::UnknownSend(provisional_id.clone()))?;

        let now = Timestamp::now();
        let entry = match self.storage.find_outbox_entry(provisional_id)? {
            Some(mut entry) => {
                entry.attempts = 0;
                entry.next_attempt_at = now;
                entry.last_error = None;
                entry
            }
            None => OutboxEntry::new(
                provisional_id.clone(),
                message.conversation_id.clone(),
                now,
            ),
        };
        self.storage.save_outbox_entry(entry)?;
        self.set_state(&message, DeliveryState::Pending)?;
        self.kick.notify_one();
        Ok(())
    }

    /// Stop sending. The message stays visible as failed.
    pub fn cancel(&self, provisional_id: &ProvisionalId) -> Result<(), SyncError> {
        let removed = self.storage.remove_outbox_entry(provisional_id)?;
        let message = self
            .storage
            .find_message_by_provisional_id(provisional_id)?
            .filter(|m| m.state.is_unconfirmed());
        match message {
            Some(message) => self.set_state(&message, DeliveryState::Failed),
            None if removed => Ok(()),
            None => Err(SyncError::UnknownSend(provisional_id.clone())),
        }
    }

    pub fn kick(&self) {
        self.kick.notify_one();
    }

    pub fn kick_handle(&self) -> Arc<Notify> {
        self.kick.clone()
    }

    /// Attempt every due entry once, oldest schedule first.
    pub async fn drain_once(&self) -> DrainReport {
        let due = match self
            .storage
            .due_outbox_entries(Timestamp::now(), self.config.outbox_batch_size.max(1))
        {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(%e, "outbox: failed to read due entries");
                return DrainReport::default();
            }
        };

        let mut report = DrainReport::default();
        for entry in due {
            match self.attempt(entry).await {
                Attempt::Confirmed => {
                    report.attempted += 1;
                    report.confirmed += 1;
                }
                Attempt::Failed => {
                    report.attempted += 1;
                    report.failed += 1;
                }
                Attempt::Skipped => {}
            }
        }
        report
    }

    /// Drain forever: after each pass sleep until the next entry is due, the
    /// poll interval passes, or a send kicks the loop.
    pub async fn run(self: Arc<Self>) {
        loop {
            let report = self.drain_once().await;
            if report.attempted > 0 {
                tracing::debug!(?report, "outbox drained");
            }
            let pause = self.next_pause();
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.kick.notified() => {}
            }
        }
    }

    fn next_pause(&self) -> Duration {
        let poll = self.config.outbox_poll_interval();
        let earliest = self
            .storage
            .due_outbox_entries(Timestamp::from_millis(i64::MAX), 1)
            .ok()
            .and_then(|entries| entries.into_iter().next());
        match earliest {
            Some(entry) => {
                let now = Timestamp::now();
                if entry.next_attempt_at <= now {
                    // Due entries that were skipped as in flight
                    Duration::from_millis(10).min(poll)
                } else {
                    entry.next_attempt_at.abs_diff(now).min(poll)
                }
            }
            None => poll,
        }
    }

    fn claim(&self, provisional_id: &ProvisionalId) -> Option<Flight<'_>> {
        if !self.in_flight.lock().insert(provisional_id.clone()) {
            return None;
        }
        Some(Flight {
            in_flight: &self.in_flight,
            provisional_id: provisional_id.clone(),
        })
    }

    /// Entries with a network attempt in progress
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    async fn attempt(&self, entry: OutboxEntry) -> Attempt {
        let provisional_id = entry.provisional_id.clone();
        let Some(_flight) = self.claim(&provisional_id) else {
            return Attempt::Skipped;
        };

        let message = match self.storage.find_message_by_provisional_id(&provisional_id) {
            Ok(Some(message)) => message,
            Ok(None) => {
                let _ = self.storage.remove_outbox_entry(&provisional_id);
                return Attempt::Skipped;
            }
            Err(e) => {
                tracing::warn!(provisional = %provisional_id, %e, "outbox: failed to load message");
                return Attempt::Skipped;
            }
        };
        if !message.state.is_unconfirmed() {
            let _ = self.storage.remove_outbox_entry(&provisional_id);
            return Attempt::Skipped;
        }

        let sent = match NewMessage::from_pending(&message) {
            Ok(new) => {
                with_timeout(
                    self.config.request_timeout(),
                    self.remote.insert_message(&new),
                )
                .await
            }
            Err(e) => Err(e),
        };

        match sent {
            Ok(ack) => self.on_ack(&provisional_id, &message, ack),
            Err(e) => {
                self.on_failure(&entry, &message, e);
                Attempt::Failed
            }
        }
    }

    fn on_ack(&self, provisional_id: &ProvisionalId, message: &Message, ack: WriteAck) -> Attempt {
        match self.arbiter.confirm_own_send(provisional_id, ack) {
            Ok(confirmed) => {
                tracing::info!(
                    conversation = %confirmed.conversation_id,
                    canonical = %ack.id,
                    "send confirmed"
                );
                if self.config.client_wake_fanout {
                    self.fan_out(provisional_id, message, ack);
                }
                Attempt::Confirmed
            }
            Err(e) => {
                // Committed remotely; the live echo or catch-up brings the row back
                tracing::warn!(provisional = %provisional_id, %e, "outbox: could not apply ack");
                let _ = self.storage.remove_outbox_entry(provisional_id);
                Attempt::Confirmed
            }
        }
    }

    fn fan_out(&self, provisional_id: &ProvisionalId, message: &Message, ack: WriteAck) {
        let committed = RemoteMessage {
            id: ack.id,
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
            created_at: ack.created_at,
            message_type: message.message_type.clone(),
            parent_id: message.parent_id.clone(),
            image_url: message.image_url.clone(),
            provisional_id: Some(provisional_id.clone()),
        };
        let remote = self.remote.clone();
        let timeout = self.config.request_timeout();
        tokio::spawn(async move {
            if let Err(e) = with_timeout(timeout, remote.notify_wake(&committed)).await {
                tracing::warn!(canonical = %committed.id, %e, "wake fanout failed");
            }
        });
    }

    fn on_failure(&self, entry: &OutboxEntry, message: &Message, error: RemoteError) {
        let attempts = entry.attempts.saturating_add(1);
        let delay = self.config.send_backoff().delay(attempts);
        let next_attempt_at = Timestamp::now().saturating_add(delay);

        match &error {
            RemoteError::ContractViolation(_) => tracing::error!(
                provisional = %entry.provisional_id,
                %error,
                "outbox: write acknowledged without canonical id, not confirming"
            ),
            _ => tracing::warn!(
                provisional = %entry.provisional_id,
                attempts,
                retry_in_ms = delay.as_millis() as u64,
                %error,
                "outbox: send failed"
            ),
        }

        let updated = match self.storage.record_send_failure(
            &entry.provisional_id,
            next_attempt_at,
            &error.to_string(),
        ) {
            Ok(updated) => updated,
            Err(e) => {
                tracing::warn!(provisional = %entry.provisional_id, %e, "outbox: failed to record failure");
                return;
            }
        };

        if updated.attempts >= self.config.max_send_attempts
            && message.state == DeliveryState::Pending
        {
            if let Err(e) = self.set_state(message, DeliveryState::Failed) {
                tracing::warn!(provisional = %entry.provisional_id, %e, "outbox: failed to mark failed");
            }
            self.updates.publish(SyncUpdate::SendFailed {
                conversation_id: message.conversation_id.clone(),
                provisional_id: entry.provisional_id.clone(),
                attempts: updated.attempts,
                error: error.to_string(),
            });
        }
    }

    fn set_state(&self, message: &Message, state: DeliveryState) -> Result<(), SyncError> {
        if message.state == state {
            return Ok(());
        }
        self.storage.set_message_state(&message.id, state)?;
        self.updates.publish(SyncUpdate::MessageStateChanged {
            conversation_id: message.conversation_id.clone(),
            message_id: message.id.clone(),
            state,
        });
        Ok(())
    }
}
