//! Fan-out of engine events to a bounded set of subscribers.

use std::sync::Arc;

use murmur_storage_traits::messages::types::{DeliveryState, UnreadSummary};
use murmur_storage_traits::{CanonicalId, ConversationId, MessageId, ProvisionalId};
use parking_lot::Mutex;

use crate::connection::ConnectionState;
use crate::error::SyncError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncUpdate {
    MessageInserted {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    MessageRelabeled {
        conversation_id: ConversationId,
        provisional_id: ProvisionalId,
        canonical_id: CanonicalId,
    },
    MessageStateChanged {
        conversation_id: ConversationId,
        message_id: MessageId,
        state: DeliveryState,
    },
    UnreadChanged {
        conversation_id: ConversationId,
        unread: UnreadSummary,
    },
    ConnectionStateChanged {
        state: ConnectionState,
    },
    /// Reconnecting keeps failing; the engine keeps trying in the background
    ConnectionFailed {
        attempts: u32,
    },
    SendFailed {
        conversation_id: ConversationId,
        provisional_id: ProvisionalId,
        attempts: u32,
        error: String,
    },
    ConversationsChanged,
}

impl SyncUpdate {
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            SyncUpdate::MessageInserted {
                conversation_id, ..
            }
            | SyncUpdate::MessageRelabeled {
                conversation_id, ..
            }
            | SyncUpdate::MessageStateChanged {
                conversation_id, ..
            }
            | SyncUpdate::UnreadChanged {
                conversation_id, ..
            }
            | SyncUpdate::SendFailed {
                conversation_id, ..
            } => Some(conversation_id),
            SyncUpdate::ConnectionStateChanged { .. }
            | SyncUpdate::ConnectionFailed { .. }
            | SyncUpdate::ConversationsChanged => None,
        }
    }
}

/// Callback-style subscriber, for hosts that prefer a listener to a channel.
pub trait SyncReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: SyncUpdate);
}

enum Subscriber {
    Channel(flume::Sender<SyncUpdate>),
    Reconciler(Arc<dyn SyncReconciler>),
}

impl Subscriber {
    /// Deliver an update; false when the subscriber is gone.
    fn deliver(&self, update: &SyncUpdate) -> bool {
        match self {
            Subscriber::Channel(tx) => tx.send(update.clone()).is_ok(),
            Subscriber::Reconciler(reconciler) => {
                reconciler.reconcile(update.clone());
                true
            }
        }
    }
}

pub struct UpdateHub {
    subscribers: Mutex<Vec<Subscriber>>,
    max_subscribers: usize,
}

impl UpdateHub {
    pub fn new(max_subscribers: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            max_subscribers,
        }
    }

    pub fn subscribe(&self) -> Result<flume::Receiver<SyncUpdate>, SyncError> {
        let (tx, rx) = flume::unbounded();
        self.add(Subscriber::Channel(tx))?;
        Ok(rx)
    }

    pub fn add_reconciler(&self, reconciler: Arc<dyn SyncReconciler>) -> Result<(), SyncError> {
        self.add(Subscriber::Reconciler(reconciler))
    }

    fn add(&self, subscriber: Subscriber) -> Result<(), SyncError> {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| match s {
            Subscriber::Channel(tx) => !tx.is_disconnected(),
            Subscriber::Reconciler(_) => true,
        });
        if subscribers.len() >= self.max_subscribers {
            return Err(SyncError::SubscriberLimit(self.max_subscribers));
        }
        subscribers.push(subscriber);
        Ok(())
    }

    pub fn publish(&self, update: SyncUpdate) {
        tracing::trace!(?update, "publish");
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.deliver(&update));
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Mutex<Vec<SyncUpdate>>);

    impl SyncReconciler for Recorder {
        fn reconcile(&self, update: SyncUpdate) {
            self.0.lock().push(update);
        }
    }

    #[test]
    fn test_publish_reaches_channels_and_reconcilers() {
        let hub = UpdateHub::new(4);
        let rx = hub.subscribe().unwrap();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        hub.add_reconciler(recorder.clone()).unwrap();

        hub.publish(SyncUpdate::ConversationsChanged);

        assert_eq!(rx.try_recv().unwrap(), SyncUpdate::ConversationsChanged);
        assert_eq!(*recorder.0.lock(), vec![SyncUpdate::ConversationsChanged]);
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let hub = UpdateHub::new(4);
        let rx = hub.subscribe().unwrap();
        let _kept = hub.subscribe().unwrap();
        drop(rx);

        hub.publish(SyncUpdate::ConversationsChanged);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn test_subscriber_limit() {
        let hub = UpdateHub::new(2);
        let _a = hub.subscribe().unwrap();
        let b = hub.subscribe().unwrap();
        assert!(matches!(hub.subscribe(), Err(SyncError::SubscriberLimit(2))));

        // A freed slot can be reused
        drop(b);
        assert!(hub.subscribe().is_ok());
    }

    #[test]
    fn test_update_conversation_id() {
        let update = SyncUpdate::UnreadChanged {
            conversation_id: ConversationId::from("c1"),
            unread: UnreadSummary::default(),
        };
        assert_eq!(update.conversation_id(), Some(&ConversationId::from("c1")));
        assert_eq!(SyncUpdate::ConversationsChanged.conversation_id(), None);
    }
}
