//! Engine-level errors.

use std::time::Duration;

use murmur_storage_traits::conversations::error::ConversationError;
use murmur_storage_traits::members::error::MemberError;
use murmur_storage_traits::messages::error::MessageError;
use murmur_storage_traits::{IdError, ProvisionalId, StorageError};
use thiserror::Error;

/// Failures talking to the remote authority or the live channel.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The network call failed in a way that may succeed on retry
    #[error("transient network failure: {0}")]
    Transient(String),

    /// The call did not finish within its deadline and was cancelled
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The requested row does not exist
    #[error("not found")]
    NotFound,

    /// An identifier was rejected before it reached the network
    #[error("malformed id: {0}")]
    MalformedId(#[from] IdError),

    /// The authority answered but broke its contract (e.g. a write ack without an id)
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// The authority refused the request
    #[error("rejected with status {status}: {message}")]
    Rejected {
        /// HTTP-style status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// The response could not be decoded
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether a retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) | Self::Timeout(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors returned by the sync engine's public operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Remote authority failure
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Caller supplied an unusable value
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No outbox entry or pending message for this provisional id
    #[error("unknown send: {0}")]
    UnknownSend(ProvisionalId),

    /// The engine was created outside a tokio runtime
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Too many update subscribers
    #[error("subscriber limit of {0} reached")]
    SubscriberLimit(usize),
}

impl SyncError {
    /// Whether the failure is a missing parent row
    pub fn is_missing_parent(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_missing_parent())
    }
}

impl From<ConversationError> for SyncError {
    fn from(e: ConversationError) -> Self {
        Self::Storage(e.into())
    }
}

impl From<MemberError> for SyncError {
    fn from(e: MemberError) -> Self {
        Self::Storage(e.into())
    }
}

impl From<MessageError> for SyncError {
    fn from(e: MessageError) -> Self {
        Self::Storage(e.into())
    }
}
