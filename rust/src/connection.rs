//! Live-channel lifecycle: subscribe, watch the heartbeat, reconnect with
//! backoff, and catch up on what was missed while the channel was dead.
//!
//! A subscription is only trusted while something arrives on it. After
//! `degraded_after` of silence the connection is reported degraded; after
//! `dead_after` it is torn down. The wall-clock time of the last event on a
//! session is kept as the death timestamp, and the next successful subscribe
//! scans every conversation from slightly before it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use murmur_storage_traits::{ConversationId, SyncStorageProvider, Timestamp};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};

use crate::arbiter::{DeliveryArbiter, Source};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::live::{LiveChannel, LiveEvent, LiveSession};
use crate::remote::{with_timeout, RemoteAuthority};
use crate::updates::{SyncUpdate, UpdateHub};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Subscribed, but nothing has arrived for a while
    Degraded,
    /// Heartbeat lost; a new subscription will be attempted
    Dead,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Dead => "dead",
        }
    }
}

/// Connection state shared between the manager, the wake path and the host.
pub struct ConnectionStatus {
    state: RwLock<ConnectionState>,
    death: Mutex<Option<Timestamp>>,
    reconnect: Notify,
    resubscribe: AtomicBool,
    updates: Arc<UpdateHub>,
}

impl ConnectionStatus {
    pub fn new(updates: Arc<UpdateHub>) -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            death: Mutex::new(None),
            reconnect: Notify::new(),
            resubscribe: AtomicBool::new(false),
            updates,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the live path may still deliver messages. Degraded counts.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Degraded
        )
    }

    /// Publishes a state change. Returns whether the state changed.
    pub fn set_state(&self, state: ConnectionState) -> bool {
        {
            let mut current = self.state.write();
            if *current == state {
                return false;
            }
            *current = state;
        }
        tracing::debug!(state = state.as_str(), "connection state");
        self.updates
            .publish(SyncUpdate::ConnectionStateChanged { state });
        true
    }

    pub fn death_timestamp(&self) -> Option<Timestamp> {
        *self.death.lock()
    }

    /// Keep the earliest unrecovered death. Returns whether `at` was recorded.
    pub fn record_death(&self, at: Timestamp) -> bool {
        let mut death = self.death.lock();
        if death.is_some() {
            return false;
        }
        *death = Some(at);
        true
    }

    pub fn clear_death(&self) {
        *self.death.lock() = None;
    }

    /// Ask the manager to verify the connection: a session that has been quiet
    /// for a heartbeat interval is replaced, a pending backoff is cut short.
    pub fn request_reconnect(&self) {
        self.reconnect.notify_one();
    }

    /// Replace the current session unconditionally, e.g. when the set of
    /// conversations changed.
    pub fn request_resubscribe(&self) {
        self.resubscribe.store(true, Ordering::SeqCst);
        self.reconnect.notify_one();
    }

    fn take_resubscribe(&self) -> bool {
        self.resubscribe.swap(false, Ordering::SeqCst)
    }
}

pub struct ConnectionManager<S> {
    status: Arc<ConnectionStatus>,
    storage: Arc<S>,
    remote: Arc<dyn RemoteAuthority>,
    live: Arc<dyn LiveChannel>,
    arbiter: Arc<DeliveryArbiter<S>>,
    updates: Arc<UpdateHub>,
    config: SyncConfig,
    on_connected: Option<Arc<Notify>>,
}

impl<S> ConnectionManager<S>
where
    S: SyncStorageProvider + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        status: Arc<ConnectionStatus>,
        storage: Arc<S>,
        remote: Arc<dyn RemoteAuthority>,
        live: Arc<dyn LiveChannel>,
        arbiter: Arc<DeliveryArbiter<S>>,
        updates: Arc<UpdateHub>,
        config: SyncConfig,
        on_connected: Option<Arc<Notify>>,
    ) -> Self {
        Self {
            status,
            storage,
            remote,
            live,
            arbiter,
            updates,
            config,
            on_connected,
        }
    }

    pub fn status(&self) -> &Arc<ConnectionStatus> {
        &self.status
    }

    /// Keep a live subscription up until the task is aborted.
    pub async fn run(self: Arc<Self>) {
        let backoff = self.config.reconnect_backoff();
        let mut attempts: u32 = 0;

        loop {
            let conversations = match self.conversation_ids() {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!(%e, "connection: failed to list conversations");
                    Vec::new()
                }
            };

            self.status.set_state(ConnectionState::Connecting);
            // A resubscribe request made before this subscribe is already satisfied
            self.status.take_resubscribe();
            let subscribed = with_timeout(
                self.config.connect_timeout(),
                self.live.subscribe(&conversations),
            )
            .await;

            match subscribed {
                Ok(session) => {
                    if attempts > 0 {
                        tracing::info!(attempts, "live channel reconnected");
                    }
                    attempts = 0;
                    self.status.set_state(ConnectionState::Connected);
                    if let Some(kick) = &self.on_connected {
                        kick.notify_one();
                    }
                    self.recover_gap().await;
                    self.pump(session).await;
                }
                Err(e) => {
                    attempts = attempts.saturating_add(1);
                    self.status.set_state(ConnectionState::Disconnected);
                    tracing::warn!(attempts, %e, "live subscribe failed");
                    if attempts == self.config.max_reconnect_attempts {
                        tracing::error!(attempts, "live channel unavailable, still retrying");
                        self.updates.publish(SyncUpdate::ConnectionFailed { attempts });
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(backoff.delay(attempts)) => {}
                        _ = self.status.reconnect.notified() => {
                            attempts = 0;
                        }
                    }
                }
            }
        }
    }

    /// Drive one session until it closes, goes silent, or is replaced.
    async fn pump(&self, session: LiveSession) {
        let heartbeat_interval = self.config.heartbeat_interval();
        let degraded_after = self.config.degraded_after();
        let dead_after = self.config.dead_after();

        let mut last_activity = Instant::now();
        let mut last_activity_at = Timestamp::now();
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                event = session.events().recv_async() => {
                    let Ok(event) = event else {
                        tracing::info!("live channel disconnected");
                        self.status.set_state(ConnectionState::Disconnected);
                        break;
                    };
                    last_activity = Instant::now();
                    last_activity_at = Timestamp::now();
                    if self.status.state() == ConnectionState::Degraded {
                        self.status.set_state(ConnectionState::Connected);
                    }
                    match event {
                        LiveEvent::Inserted(message) => {
                            let id = message.id;
                            if let Err(e) = self.arbiter.observe(message, Source::Live) {
                                tracing::warn!(canonical = %id, %e, "live insert not applied");
                            }
                        }
                        LiveEvent::HeartbeatAck => {}
                        LiveEvent::Closed(reason) => {
                            tracing::info!(%reason, "live channel closed by remote");
                            self.status.set_state(ConnectionState::Disconnected);
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let silent = last_activity.elapsed();
                    if silent >= dead_after {
                        tracing::warn!(silent_ms = silent.as_millis() as u64, "live channel dead");
                        self.status.set_state(ConnectionState::Dead);
                        break;
                    }
                    if silent >= degraded_after {
                        self.status.set_state(ConnectionState::Degraded);
                    }
                    if !session.heartbeat() {
                        self.status.set_state(ConnectionState::Disconnected);
                        break;
                    }
                    if self.status.death_timestamp().is_some() {
                        self.recover_gap().await;
                    }
                }
                _ = self.status.reconnect.notified() => {
                    if self.status.take_resubscribe() {
                        tracing::info!("resubscribing live channel");
                        break;
                    }
                    if last_activity.elapsed() >= heartbeat_interval {
                        tracing::info!("live channel quiet on reconnect request, replacing");
                        self.status.set_state(ConnectionState::Dead);
                        break;
                    }
                }
            }
        }

        if self.status.record_death(last_activity_at) {
            tracing::debug!(at = %last_activity_at, "recorded live channel death");
        }
        session.close();
    }

    /// Scan for what the live channel missed. The death timestamp is cleared
    /// only when every conversation was scanned.
    async fn recover_gap(&self) {
        let death = self.status.death_timestamp();
        let since = death.map(|at| at.saturating_sub(self.config.catch_up_skew()));
        match self.catch_up(since).await {
            Ok(inserted) => {
                if death.is_some() {
                    self.status.clear_death();
                }
                if inserted > 0 {
                    tracing::info!(inserted, "catch-up recovered messages");
                }
            }
            Err(e) => tracing::warn!(%e, "catch-up failed, will retry"),
        }
    }

    /// Page through every conversation from `since`, or from each
    /// conversation's last sync when `since` is `None`. Without `since`,
    /// conversations never synced or synced longer ago than the fallback window
    /// are left to bootstrap. Returns the number of inserted messages.
    pub async fn catch_up(&self, since: Option<Timestamp>) -> Result<usize, SyncError> {
        let skew = self.config.catch_up_skew();
        let recent = self.config.wake_fallback_window();
        let now = Timestamp::now();
        let mut inserted = 0;
        for conversation in self.storage.all_conversations()? {
            let start = match since {
                Some(since) => since,
                None => match conversation.last_synced_at {
                    Some(synced) if now.abs_diff(synced) <= recent => synced.saturating_sub(skew),
                    _ => continue,
                },
            };
            inserted += self.catch_up_conversation(&conversation.id, start).await?;
        }
        Ok(inserted)
    }

    async fn catch_up_conversation(
        &self,
        conversation_id: &ConversationId,
        since: Timestamp,
    ) -> Result<usize, SyncError> {
        let started = Timestamp::now();
        let page_size = self.config.catch_up_page_size.max(1);
        let mut cursor = since;
        let mut limit = page_size;
        let mut inserted = 0;

        // Pages overlap at the cursor millisecond; the arbiter drops the repeats
        loop {
            let page = with_timeout(
                self.config.request_timeout(),
                self.remote.scan_messages(conversation_id, cursor, limit),
            )
            .await?;
            let fetched = page.len();
            let Some(newest) = page.last().map(|m| m.created_at) else {
                break;
            };
            inserted += self.arbiter.observe_all(page, Source::CatchUp);

            if newest > cursor {
                cursor = newest;
                limit = page_size;
            } else if fetched < limit {
                break;
            } else {
                // A full page inside one millisecond: widen until it spills past
                limit = limit.saturating_mul(2);
            }
        }

        self.storage.set_last_synced_at(conversation_id, started)?;
        tracing::debug!(conversation = %conversation_id, since = %since, inserted, "caught up");
        Ok(inserted)
    }

    fn conversation_ids(&self) -> Result<Vec<ConversationId>, SyncError> {
        Ok(self
            .storage
            .all_conversations()?
            .into_iter()
            .map(|c| c.id)
            .collect())
    }
}
