//! An authority that lives in the same process.
//!
//! It keeps the authoritative tables in memory, assigns canonical ids, fans
//! inserts out to live subscribers and queues wake payloads per recipient. Fault
//! switches let callers reproduce the failures the engine has to survive: an
//! unreachable network, a live channel that silently stops delivering, writes
//! acknowledged without an id, and transient insert failures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use murmur_storage_traits::conversations::types::{Conversation, User};
use murmur_storage_traits::members::types::{MemberRole, Watermark};
use murmur_storage_traits::{CanonicalId, ConversationId, Timestamp, UserId};
use parking_lot::Mutex;

use super::{NewMessage, RemoteAuthority, RemoteMember, RemoteMessage, WriteAck};
use crate::error::RemoteError;
use crate::live::{LiveChannel, LiveCommand, LiveEvent, LiveSession};
use crate::wake::WakePayload;

type WakeData = HashMap<String, String>;

struct Subscriber {
    id: u64,
    conversations: HashSet<ConversationId>,
    events: flume::Sender<LiveEvent>,
    alive: Arc<AtomicBool>,
}

#[derive(Default)]
struct Faults {
    offline: bool,
    refuse_live: bool,
    omit_write_ids: bool,
    failing_inserts: u32,
    latency: Option<Duration>,
}

#[derive(Default)]
struct State {
    users: BTreeMap<UserId, User>,
    conversations: BTreeMap<ConversationId, Conversation>,
    members: BTreeMap<ConversationId, BTreeMap<UserId, (MemberRole, Option<Watermark>)>>,
    messages: Vec<RemoteMessage>,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
    wake_inboxes: HashMap<UserId, (flume::Sender<WakeData>, flume::Receiver<WakeData>)>,
    faults: Faults,
    last_created_at: i64,
}

impl State {
    fn check_online(&self) -> Result<(), RemoteError> {
        if self.faults.offline {
            return Err(RemoteError::Transient("network unreachable".to_string()));
        }
        Ok(())
    }

    // Server clock: wall time, strictly increasing
    fn next_created_at(&mut self) -> Timestamp {
        let now = Timestamp::now().as_millis().max(self.last_created_at + 1);
        self.last_created_at = now;
        Timestamp::from_millis(now)
    }

    fn broadcast(&mut self, message: &RemoteMessage) {
        self.subscribers.retain(|subscriber| {
            if !subscriber.conversations.contains(&message.conversation_id)
                || !subscriber.alive.load(Ordering::SeqCst)
            {
                return true;
            }
            subscriber
                .events
                .send(LiveEvent::Inserted(message.clone()))
                .is_ok()
        });
    }

    fn inbox(&mut self, user_id: &UserId) -> flume::Receiver<WakeData> {
        self.wake_inboxes
            .entry(user_id.clone())
            .or_insert_with(flume::unbounded)
            .1
            .clone()
    }
}

#[derive(Clone, Default)]
pub struct InProcessAuthority {
    state: Arc<Mutex<State>>,
}

impl InProcessAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) {
        self.state.lock().users.insert(user.id.clone(), user);
    }

    /// Create a conversation with `members`. The first member becomes admin.
    pub fn create_conversation(&self, conversation: Conversation, members: &[UserId]) {
        let mut state = self.state.lock();
        let roster = state
            .members
            .entry(conversation.id.clone())
            .or_default();
        for (index, user_id) in members.iter().enumerate() {
            let role = if index == 0 {
                MemberRole::Admin
            } else {
                MemberRole::Member
            };
            roster.insert(user_id.clone(), (role, None));
        }
        state
            .conversations
            .insert(conversation.id.clone(), conversation);
    }

    /// Commit a message written by some other client and fan it out.
    pub fn post(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
    ) -> RemoteMessage {
        let created_at = self.state.lock().next_created_at();
        self.post_at(conversation_id, sender_id, content, created_at)
    }

    /// Like [`post`](Self::post) with the server timestamp given, so several rows
    /// can share one millisecond.
    pub fn post_at(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
        created_at: Timestamp,
    ) -> RemoteMessage {
        let mut state = self.state.lock();
        let message = RemoteMessage::new(
            CanonicalId::generate(),
            conversation_id.clone(),
            sender_id.clone(),
            content,
            created_at,
        );
        state.messages.push(message.clone());
        state.broadcast(&message);
        message
    }

    pub fn messages_in(&self, conversation_id: &ConversationId) -> Vec<RemoteMessage> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn watermark(&self, conversation_id: &ConversationId, user_id: &UserId) -> Option<Watermark> {
        self.state
            .lock()
            .members
            .get(conversation_id)
            .and_then(|roster| roster.get(user_id))
            .and_then(|(_, watermark)| watermark.clone())
    }

    /// Overwrite a user's watermark, as another device of that user would.
    pub fn set_watermark(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        watermark: Watermark,
    ) {
        if let Some(entry) = self
            .state
            .lock()
            .members
            .get_mut(conversation_id)
            .and_then(|roster| roster.get_mut(user_id))
        {
            entry.1 = Some(watermark);
        }
    }

    /// Wake payloads addressed to `user_id`.
    pub fn wake_inbox(&self, user_id: &UserId) -> flume::Receiver<WakeData> {
        self.state.lock().inbox(user_id)
    }

    /// Make every current live subscription go silent: the session stays open
    /// but neither inserts nor heartbeat acks are delivered.
    pub fn kill_live(&self) {
        for subscriber in &self.state.lock().subscribers {
            subscriber.alive.store(false, Ordering::SeqCst);
        }
    }

    /// Close every live subscription from the server side.
    pub fn close_live(&self) {
        let subscribers = std::mem::take(&mut self.state.lock().subscribers);
        for subscriber in subscribers {
            let _ = subscriber
                .events
                .send(LiveEvent::Closed("closed by server".to_string()));
        }
    }

    /// Number of subscriptions that still deliver events
    pub fn live_subscribers(&self) -> usize {
        self.state
            .lock()
            .subscribers
            .iter()
            .filter(|s| s.alive.load(Ordering::SeqCst) && !s.events.is_disconnected())
            .count()
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().faults.offline = offline;
    }

    pub fn set_refuse_live(&self, refuse: bool) {
        self.state.lock().faults.refuse_live = refuse;
    }

    /// Commit writes but answer without the canonical id.
    pub fn set_omit_write_ids(&self, omit: bool) {
        self.state.lock().faults.omit_write_ids = omit;
    }

    /// Fail the next `count` inserts before they commit.
    pub fn fail_next_inserts(&self, count: u32) {
        self.state.lock().faults.failing_inserts = count;
    }

    /// Delay every authority call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().faults.latency = latency;
    }

    async fn enter(&self) -> Result<(), RemoteError> {
        let latency = {
            let state = self.state.lock();
            state.check_online()?;
            state.faults.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteAuthority for InProcessAuthority {
    async fn insert_message(&self, new: &NewMessage) -> Result<WriteAck, RemoteError> {
        self.enter().await?;
        let mut state = self.state.lock();
        if state.faults.failing_inserts > 0 {
            state.faults.failing_inserts -= 1;
            return Err(RemoteError::Transient("connection reset".to_string()));
        }
        if !state.conversations.contains_key(&new.conversation_id) {
            return Err(RemoteError::Rejected {
                status: 409,
                message: format!("unknown conversation {}", new.conversation_id),
            });
        }

        let created_at = state.next_created_at();
        let message = RemoteMessage {
            id: CanonicalId::generate(),
            conversation_id: new.conversation_id.clone(),
            sender_id: new.sender_id.clone(),
            content: new.content.clone(),
            created_at,
            message_type: new.message_type.clone(),
            parent_id: new.parent_id.clone(),
            image_url: new.image_url.clone(),
            provisional_id: Some(new.provisional_id.clone()),
        };
        state.messages.push(message.clone());
        state.broadcast(&message);

        if state.faults.omit_write_ids {
            return Err(RemoteError::ContractViolation(
                "write acknowledged without an id".to_string(),
            ));
        }
        Ok(WriteAck {
            id: message.id,
            created_at,
        })
    }

    async fn fetch_message(&self, id: &CanonicalId) -> Result<RemoteMessage, RemoteError> {
        self.enter().await?;
        self.state
            .lock()
            .messages
            .iter()
            .find(|m| &m.id == id)
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn scan_messages(
        &self,
        conversation_id: &ConversationId,
        since: Timestamp,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, RemoteError> {
        self.enter().await?;
        let state = self.state.lock();
        let mut found: Vec<RemoteMessage> = state
            .messages
            .iter()
            .filter(|m| &m.conversation_id == conversation_id && m.created_at >= since)
            .cloned()
            .collect();
        found.sort_by_key(|m| (m.created_at, m.id));
        found.truncate(limit);
        Ok(found)
    }

    async fn recent_messages(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, RemoteError> {
        self.enter().await?;
        let mut found = self.messages_in(conversation_id);
        found.sort_by_key(|m| (m.created_at, m.id));
        let skip = found.len().saturating_sub(limit);
        Ok(found.split_off(skip))
    }

    async fn conversations(&self, user_id: &UserId) -> Result<Vec<Conversation>, RemoteError> {
        self.enter().await?;
        let state = self.state.lock();
        Ok(state
            .members
            .iter()
            .filter(|(_, roster)| roster.contains_key(user_id))
            .filter_map(|(id, _)| state.conversations.get(id).cloned())
            .collect())
    }

    async fn other_members(
        &self,
        conversation_id: &ConversationId,
        exclude: &UserId,
    ) -> Result<Vec<RemoteMember>, RemoteError> {
        self.enter().await?;
        let state = self.state.lock();
        let roster = state
            .members
            .get(conversation_id)
            .ok_or(RemoteError::NotFound)?;
        Ok(roster
            .iter()
            .filter(|(user_id, _)| *user_id != exclude)
            .filter_map(|(user_id, (role, _))| {
                state.users.get(user_id).map(|user| RemoteMember {
                    user: user.clone(),
                    role: *role,
                })
            })
            .collect())
    }

    async fn fetch_user(&self, user_id: &UserId) -> Result<User, RemoteError> {
        self.enter().await?;
        self.state
            .lock()
            .users
            .get(user_id)
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn read_watermark(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Option<Watermark>, RemoteError> {
        self.enter().await?;
        Ok(self.watermark(conversation_id, user_id))
    }

    async fn write_watermark(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        watermark: &Watermark,
    ) -> Result<(), RemoteError> {
        self.enter().await?;
        let mut state = self.state.lock();
        let entry = state
            .members
            .get_mut(conversation_id)
            .and_then(|roster| roster.get_mut(user_id))
            .ok_or(RemoteError::NotFound)?;
        entry.1 = Some(watermark.clone());
        Ok(())
    }

    async fn notify_wake(&self, message: &RemoteMessage) -> Result<(), RemoteError> {
        self.enter().await?;
        let mut state = self.state.lock();
        let name = state
            .conversations
            .get(&message.conversation_id)
            .map(|c| c.name.clone());
        let data = WakePayload::from_message(message, name.as_deref()).to_data();
        let recipients: Vec<UserId> = state
            .members
            .get(&message.conversation_id)
            .map(|roster| {
                roster
                    .keys()
                    .filter(|user_id| **user_id != message.sender_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for user_id in recipients {
            state.inbox(&user_id);
            if let Some((tx, _)) = state.wake_inboxes.get(&user_id) {
                let _ = tx.send(data.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LiveChannel for InProcessAuthority {
    async fn subscribe(&self, conversations: &[ConversationId]) -> Result<LiveSession, RemoteError> {
        self.enter().await?;
        let (event_tx, event_rx) = flume::unbounded();
        let (command_tx, command_rx) = flume::unbounded::<LiveCommand>();
        let alive = Arc::new(AtomicBool::new(true));

        let id = {
            let mut state = self.state.lock();
            if state.faults.refuse_live {
                return Err(RemoteError::Transient("live channel refused".to_string()));
            }
            let id = state.next_subscriber;
            state.next_subscriber += 1;
            state.subscribers.push(Subscriber {
                id,
                conversations: conversations.iter().cloned().collect(),
                events: event_tx.clone(),
                alive: alive.clone(),
            });
            id
        };

        let state = self.state.clone();
        tokio::spawn(async move {
            while let Ok(command) = command_rx.recv_async().await {
                match command {
                    LiveCommand::Heartbeat => {
                        if alive.load(Ordering::SeqCst) {
                            let _ = event_tx.send(LiveEvent::HeartbeatAck);
                        }
                    }
                    LiveCommand::Close => break,
                }
            }
            state.lock().subscribers.retain(|s| s.id != id);
        });

        Ok(LiveSession::new(event_rx, command_tx))
    }
}
