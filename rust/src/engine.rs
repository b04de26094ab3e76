//! The engine facade: wires the local store, the remote authority and the live
//! channel into the outbox, the delivery arbiter, the read tracker and the
//! connection manager, and exposes the operations a host app calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use murmur_storage_traits::conversations::types::{Conversation, User};
use murmur_storage_traits::messages::types::{Message, UnreadSummary};
use murmur_storage_traits::messages::Pagination;
use murmur_storage_traits::{ConversationId, MessageId, ProvisionalId, SyncStorageProvider, Timestamp};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;

use crate::arbiter::DeliveryArbiter;
use crate::bootstrap::{BootstrapReport, Bootstrapper};
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, ConnectionState, ConnectionStatus};
use crate::error::SyncError;
use crate::integrity::Integrity;
use crate::live::LiveChannel;
use crate::outbox::{DrainReport, Outbox, OutgoingMessage};
use crate::read_status::ReadTracker;
use crate::remote::RemoteAuthority;
use crate::scheduler::{ScheduledTask, TaskGroup};
use crate::updates::{SyncReconciler, SyncUpdate, UpdateHub};
use crate::wake::{
    decide_notification, AppPresence, WakeHandler, WakeOutcome, WakePayload, WakeResolution,
};

pub struct SyncEngine<S> {
    storage: Arc<S>,
    self_user: User,
    config: SyncConfig,
    runtime: Handle,
    updates: Arc<UpdateHub>,
    integrity: Arc<Integrity<S>>,
    tracker: Arc<ReadTracker<S>>,
    status: Arc<ConnectionStatus>,
    connection: Arc<ConnectionManager<S>>,
    outbox: Arc<Outbox<S>>,
    wake: WakeHandler<S>,
    bootstrapper: Arc<Bootstrapper<S>>,
    bootstrapped: Arc<AtomicBool>,
    refresh: Mutex<Option<ScheduledTask>>,
    presence: RwLock<AppPresence>,
    loops: Mutex<Vec<ScheduledTask>>,
    // Conversation-scoped fetches, abandoned when the conversation closes
    scoped: TaskGroup<ConversationId>,
}

impl<S> SyncEngine<S>
where
    S: SyncStorageProvider + Send + Sync + 'static,
{
    /// Build an engine. Must be called from within a tokio runtime.
    pub fn new(
        storage: Arc<S>,
        remote: Arc<dyn RemoteAuthority>,
        live: Arc<dyn LiveChannel>,
        self_user: User,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let updates = Arc::new(UpdateHub::new(config.max_subscribers));
        let integrity = Arc::new(Integrity::new(storage.clone()));
        let tracker = Arc::new(ReadTracker::new(
            storage.clone(),
            remote.clone(),
            integrity.clone(),
            updates.clone(),
            self_user.id.clone(),
            config.clone(),
            runtime.clone(),
        ));
        let arbiter = Arc::new(DeliveryArbiter::new(
            storage.clone(),
            integrity.clone(),
            tracker.clone(),
            updates.clone(),
            config.dedup_window(),
            config.dedup_granularity(),
        ));
        let outbox = Arc::new(Outbox::new(
            storage.clone(),
            remote.clone(),
            arbiter.clone(),
            updates.clone(),
            self_user.id.clone(),
            config.clone(),
        ));
        let status = Arc::new(ConnectionStatus::new(updates.clone()));
        let connection = Arc::new(ConnectionManager::new(
            status.clone(),
            storage.clone(),
            remote.clone(),
            live,
            arbiter.clone(),
            updates.clone(),
            config.clone(),
            Some(outbox.kick_handle()),
        ));
        let wake = WakeHandler::new(
            arbiter.clone(),
            remote.clone(),
            status.clone(),
            config.clone(),
        );
        let bootstrapper = Arc::new(Bootstrapper::new(
            storage.clone(),
            remote,
            integrity.clone(),
            tracker.clone(),
            arbiter,
            status.clone(),
            updates.clone(),
            self_user.clone(),
            config.clone(),
        ));

        Ok(Self {
            storage,
            self_user,
            config,
            scoped: TaskGroup::new(runtime.clone()),
            runtime,
            updates,
            integrity,
            tracker,
            status,
            connection,
            outbox,
            wake,
            bootstrapper,
            bootstrapped: Arc::new(AtomicBool::new(false)),
            refresh: Mutex::new(None),
            presence: RwLock::new(AppPresence::default()),
            loops: Mutex::new(Vec::new()),
        })
    }

    /// Seed the local user, bootstrap from the remote authority and start the
    /// outbox and connection loops. Bootstrap failures are logged and retried
    /// on the next foreground or connectivity signal; local operations work
    /// regardless.
    pub async fn start(&self) -> Result<(), SyncError> {
        self.integrity.seed_local_user(&self.self_user)?;
        if !self.config.network_enabled() {
            tracing::info!("network disabled, running local-only");
            return Ok(());
        }
        if !self.loops.lock().is_empty() {
            return Ok(());
        }

        match self.bootstrap().await {
            Ok(report) => tracing::info!(?report, "bootstrap complete"),
            Err(e) => tracing::warn!(%e, "bootstrap failed, continuing from local state"),
        }

        let mut loops = self.loops.lock();
        if loops.is_empty() {
            loops.push(ScheduledTask::spawn(
                &self.runtime,
                self.outbox.clone().run(),
            ));
            loops.push(ScheduledTask::spawn(
                &self.runtime,
                self.connection.clone().run(),
            ));
        }
        Ok(())
    }

    /// Stop background work. Queued sends stay in the outbox.
    pub fn stop(&self) {
        self.loops.lock().clear();
        self.refresh.lock().take();
        self.scoped.cancel_all();
        self.tracker.cancel_pushes();
        self.status.set_state(ConnectionState::Disconnected);
    }

    pub fn is_running(&self) -> bool {
        self.loops.lock().iter().any(|task| !task.is_finished())
    }

    /// Load conversations, members, read watermarks and the most recent
    /// messages from the remote authority.
    pub async fn bootstrap(&self) -> Result<BootstrapReport, SyncError> {
        let result = self.bootstrapper.run().await;
        self.bootstrapped.store(result.is_ok(), Ordering::SeqCst);
        result
    }

    // Sending

    pub fn send(
        &self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> Result<ProvisionalId, SyncError> {
        self.send_with(conversation_id, OutgoingMessage::text(content))
    }

    pub fn send_with(
        &self,
        conversation_id: &ConversationId,
        message: OutgoingMessage,
    ) -> Result<ProvisionalId, SyncError> {
        self.outbox.send(conversation_id, message)
    }

    pub fn retry_send(&self, provisional_id: &ProvisionalId) -> Result<(), SyncError> {
        self.outbox.retry(provisional_id)
    }

    pub fn cancel_send(&self, provisional_id: &ProvisionalId) -> Result<(), SyncError> {
        self.outbox.cancel(provisional_id)
    }

    /// Run one outbox pass now, whether or not the loop is running.
    pub async fn flush_outbox(&self) -> DrainReport {
        self.outbox.drain_once().await
    }

    // Read state

    pub fn mark_read(
        &self,
        conversation_id: &ConversationId,
        message_id: MessageId,
        at: Timestamp,
    ) -> Result<bool, SyncError> {
        self.tracker.mark_read(conversation_id, message_id, at)
    }

    /// Mark everything currently held for the conversation as read.
    pub fn mark_conversation_read(&self, conversation_id: &ConversationId) -> Result<bool, SyncError> {
        match self.storage.latest_message(conversation_id)? {
            Some(latest) => self.mark_read(conversation_id, latest.id, latest.created_at),
            None => Ok(false),
        }
    }

    pub fn unread(&self, conversation_id: &ConversationId) -> Result<UnreadSummary, SyncError> {
        self.tracker.unread(conversation_id)
    }

    /// Open a conversation on screen. Returns the unread state at open time;
    /// messages arriving while it stays open are marked read as they land.
    /// A watermark pull runs in the background and is abandoned on close.
    pub fn open_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<UnreadSummary, SyncError> {
        let unread = self.tracker.open_conversation(conversation_id)?;
        if self.config.network_enabled() {
            let tracker = self.tracker.clone();
            let id = conversation_id.clone();
            self.scoped.spawn(conversation_id.clone(), async move {
                if let Err(e) = tracker.reconcile_with_remote(&id).await {
                    tracing::debug!(conversation = %id, %e, "watermark refresh failed");
                }
            });
        }
        Ok(unread)
    }

    pub fn close_conversation(&self, conversation_id: &ConversationId) {
        self.tracker.close_conversation(conversation_id);
        self.scoped.cancel(conversation_id);
    }

    // Wake channel

    /// Handle a wake payload delivered by the platform push service.
    pub async fn handle_wake(&self, data: &HashMap<String, String>) -> WakeOutcome {
        let Some(payload) = WakePayload::parse(data) else {
            return WakeOutcome {
                resolution: WakeResolution::Ignored,
                decision: None,
            };
        };
        let resolution = self.wake.resolve(&payload).await;
        let open = self.tracker.open_conversation_id();
        let decision = decide_notification(&payload, self.presence(), open.as_ref());
        WakeOutcome {
            resolution,
            decision: Some(decision),
        }
    }

    // Lifecycle signals

    pub fn presence(&self) -> AppPresence {
        *self.presence.read()
    }

    /// The app came to the foreground: verify the live channel and retry any
    /// work that waited on connectivity.
    pub fn on_foreground(&self) {
        *self.presence.write() = AppPresence::Foreground;
        self.resume();
    }

    pub fn on_background(&self) {
        *self.presence.write() = AppPresence::Background;
    }

    pub fn on_network_available(&self) {
        self.resume();
    }

    fn resume(&self) {
        if !self.config.network_enabled() {
            return;
        }
        self.status.request_reconnect();
        self.outbox.kick();
        let stale = !self.bootstrapped.load(Ordering::SeqCst)
            || self.integrity.deferred_message_count() > 0
            || self.integrity.deferred_member_count() > 0;
        let refreshing = self
            .refresh
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        if stale && !refreshing {
            tracing::debug!("refreshing conversations from the remote authority");
            self.spawn_bootstrap();
        }
    }

    fn spawn_bootstrap(&self) {
        let bootstrapper = self.bootstrapper.clone();
        let bootstrapped = self.bootstrapped.clone();
        let task = ScheduledTask::spawn(&self.runtime, async move {
            match bootstrapper.run().await {
                Ok(report) => {
                    tracing::info!(?report, "background bootstrap complete");
                    bootstrapped.store(true, Ordering::SeqCst);
                }
                Err(e) => tracing::warn!(%e, "background bootstrap failed"),
            }
        });
        *self.refresh.lock() = Some(task);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.status.state()
    }

    /// Scan every conversation from `since` and merge what comes back.
    pub async fn catch_up(&self, since: Timestamp) -> Result<usize, SyncError> {
        self.connection.catch_up(Some(since)).await
    }

    // Observation

    pub fn subscribe(&self) -> Result<flume::Receiver<SyncUpdate>, SyncError> {
        self.updates.subscribe()
    }

    pub fn add_reconciler(&self, reconciler: Arc<dyn SyncReconciler>) -> Result<(), SyncError> {
        self.updates.add_reconciler(reconciler)
    }

    /// Messages of a conversation, newest first.
    pub fn messages(
        &self,
        conversation_id: &ConversationId,
        pagination: Option<Pagination>,
    ) -> Result<Vec<Message>, SyncError> {
        Ok(self.storage.messages(conversation_id, pagination)?)
    }

    pub fn conversations(&self) -> Result<Vec<Conversation>, SyncError> {
        Ok(self.storage.all_conversations()?)
    }

    pub fn self_user(&self) -> &User {
        &self.self_user
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Number of sends still queued
    pub fn pending_sends(&self) -> Result<usize, SyncError> {
        Ok(self.storage.outbox_entries()?.len())
    }
}
