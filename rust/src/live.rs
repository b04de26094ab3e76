//! Live channel: a publish/subscribe stream of committed message inserts.
//!
//! A [`LiveSession`] is one acknowledged subscription. Liveness is judged by the
//! application-level heartbeat: the connection manager sends
//! [`LiveCommand::Heartbeat`] and expects [`LiveEvent::HeartbeatAck`] (or any
//! other event) back. A session whose transport still looks open but delivers
//! nothing is dead.

use async_trait::async_trait;
use murmur_storage_traits::ConversationId;

use crate::error::RemoteError;
use crate::remote::RemoteMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    Inserted(RemoteMessage),
    HeartbeatAck,
    /// The remote end closed the subscription
    Closed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveCommand {
    Heartbeat,
    Close,
}

#[derive(Debug)]
pub struct LiveSession {
    events: flume::Receiver<LiveEvent>,
    commands: flume::Sender<LiveCommand>,
}

impl LiveSession {
    pub fn new(events: flume::Receiver<LiveEvent>, commands: flume::Sender<LiveCommand>) -> Self {
        Self { events, commands }
    }

    pub fn events(&self) -> &flume::Receiver<LiveEvent> {
        &self.events
    }

    /// Send a heartbeat. Returns false when the command side is gone.
    pub fn heartbeat(&self) -> bool {
        self.commands.send(LiveCommand::Heartbeat).is_ok()
    }

    pub fn close(&self) {
        let _ = self.commands.send(LiveCommand::Close);
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
pub trait LiveChannel: Send + Sync {
    /// Open a subscription for `conversations`. Returning `Ok` means the
    /// subscription was acknowledged. Callable again after a disconnect.
    async fn subscribe(&self, conversations: &[ConversationId]) -> Result<LiveSession, RemoteError>;
}
