//! Local-first chat sync and read tracking.
//!
//! Messages reach the local store through several independent paths: the live
//! channel, wake (push) payloads, periodic catch-up scans and bootstrap. The
//! [`DeliveryArbiter`] funnels all of them into exactly one row per message.
//! Sends are written locally first and drained by the [`Outbox`]; read
//! watermarks are written locally first and pushed in the background by the
//! [`ReadTracker`]. [`SyncEngine`] wires the pieces together.

pub mod arbiter;
pub mod backoff;
pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod integrity;
pub mod live;
mod logging;
pub mod outbox;
pub mod read_status;
pub mod remote;
pub mod scheduler;
pub mod updates;
pub mod wake;

pub use arbiter::{DeliveryArbiter, Outcome, Source};
pub use bootstrap::BootstrapReport;
pub use config::{default_config_json, load_sync_config, SyncConfig};
pub use connection::{ConnectionState, ConnectionStatus};
pub use engine::SyncEngine;
pub use error::{RemoteError, SyncError};
pub use live::{LiveChannel, LiveEvent, LiveSession};
pub use logging::init_logging;
pub use outbox::{DrainReport, Outbox, OutgoingMessage};
pub use read_status::ReadTracker;
pub use remote::{HttpAuthority, InProcessAuthority, RemoteAuthority, RemoteMessage};
pub use updates::{SyncReconciler, SyncUpdate};
pub use wake::{AppPresence, NotificationDecision, WakeOutcome, WakePayload, WakeResolution};

pub use murmur_storage_traits::{
    CanonicalId, ConversationId, MessageId, ProvisionalId, Timestamp, UserId,
};
