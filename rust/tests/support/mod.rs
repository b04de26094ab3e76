#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use murmur_core::{
    InProcessAuthority, SyncConfig, SyncEngine, SyncReconciler, SyncUpdate, UserId,
};
use murmur_memory_storage::MurmurMemoryStorage;
use murmur_storage_traits::conversations::types::User;
use murmur_storage_traits::test_utils::{create_test_conversation, create_test_user};
use murmur_storage_traits::SyncStorageProvider;

pub use murmur_test_utils::{wait_until, wait_until_with_poll};

pub const C1: &str = "c1";

/// Millisecond-scale timings so liveness and backoff play out within a test.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        disable_network: Some(false),
        heartbeat_interval_ms: 25,
        degraded_after_ms: 75,
        dead_after_ms: 150,
        connect_timeout_ms: 500,
        request_timeout_ms: 500,
        reconnect_backoff_base_ms: 10,
        reconnect_backoff_max_ms: 50,
        max_reconnect_attempts: 3,
        send_backoff_base_ms: 10,
        send_backoff_max_ms: 50,
        outbox_poll_interval_ms: 20,
        ..SyncConfig::default()
    }
}

/// An authority with the given users, all members of conversation `c1`.
pub fn authority_with(users: &[&str]) -> InProcessAuthority {
    let authority = InProcessAuthority::new();
    let ids: Vec<UserId> = users.iter().map(|u| UserId::from(*u)).collect();
    for user in users {
        authority.add_user(create_test_user(user));
    }
    authority.create_conversation(create_test_conversation(C1), &ids);
    authority
}

pub fn user(id: &str) -> User {
    create_test_user(id)
}

pub fn engine_with<S>(
    storage: Arc<S>,
    authority: &InProcessAuthority,
    user_id: &str,
    config: SyncConfig,
) -> SyncEngine<S>
where
    S: SyncStorageProvider + Send + Sync + 'static,
{
    SyncEngine::new(
        storage,
        Arc::new(authority.clone()),
        Arc::new(authority.clone()),
        user(user_id),
        config,
    )
    .unwrap()
}

pub fn memory_engine(
    authority: &InProcessAuthority,
    user_id: &str,
    config: SyncConfig,
) -> SyncEngine<MurmurMemoryStorage> {
    engine_with(
        Arc::new(MurmurMemoryStorage::new()),
        authority,
        user_id,
        config,
    )
}

pub struct TestReconciler {
    updates: Arc<Mutex<Vec<SyncUpdate>>>,
}

impl TestReconciler {
    pub fn new() -> (Arc<Self>, Arc<Mutex<Vec<SyncUpdate>>>) {
        let updates = Arc::new(Mutex::new(vec![]));
        (
            Arc::new(Self {
                updates: updates.clone(),
            }),
            updates,
        )
    }
}

impl SyncReconciler for TestReconciler {
    fn reconcile(&self, update: SyncUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}
