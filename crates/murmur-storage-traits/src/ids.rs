//! Identifier newtypes and the millisecond timestamp used across the local store.
//!
//! Messages carry two kinds of identifiers:
//!
//! - [`CanonicalId`]: assigned by the remote authority once it accepts a write.
//!   Always a UUID.
//! - [`ProvisionalId`]: generated on the device at send time (`local-<uuid>`), used
//!   for optimistic display until the canonical id is known.
//!
//! The local row key, [`MessageId`], holds whichever of the two the row is
//! currently keyed by.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix carried by every provisional id.
pub const PROVISIONAL_PREFIX: &str = "local-";

/// Identifier parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The value is not a canonical (server-assigned) id
    #[error("not a canonical id: {0}")]
    NotCanonical(String),
    /// The value is not a provisional (client-assigned) id
    #[error("not a provisional id: {0}")]
    NotProvisional(String),
    /// The value is empty
    #[error("empty identifier")]
    Empty,
}

/// Server-assigned, globally stable message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId(Uuid);

impl CanonicalId {
    /// Parse a canonical id, rejecting provisional or otherwise malformed values.
    pub fn parse(value: &str) -> Result<Self, IdError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdError::Empty);
        }
        Uuid::parse_str(trimmed)
            .map(Self)
            .map_err(|_| IdError::NotCanonical(value.to_string()))
    }

    /// Wrap an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a fresh id. Only the remote authority (or a fake of it) should do this.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for CanonicalId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Client-assigned temporary message identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisionalId(String);

impl ProvisionalId {
    /// Generate a new provisional id
    pub fn generate() -> Self {
        Self(format!("{PROVISIONAL_PREFIX}{}", Uuid::new_v4().simple()))
    }

    /// Parse a provisional id
    pub fn parse(value: &str) -> Result<Self, IdError> {
        if value.is_empty() {
            return Err(IdError::Empty);
        }
        if !value.starts_with(PROVISIONAL_PREFIX) || value.len() == PROVISIONAL_PREFIX.len() {
            return Err(IdError::NotProvisional(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    /// Get as `&str`
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProvisionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local row key of a message: canonical for confirmed rows, provisional otherwise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Build from an arbitrary stored value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get as `&str`
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the row is still keyed by a provisional id
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    /// The canonical id this key holds, if it holds one.
    pub fn canonical(&self) -> Result<CanonicalId, IdError> {
        CanonicalId::parse(&self.0)
    }
}

impl From<CanonicalId> for MessageId {
    fn from(id: CanonicalId) -> Self {
        Self(id.to_string())
    }
}

impl From<&CanonicalId> for MessageId {
    fn from(id: &CanonicalId) -> Self {
        Self(id.to_string())
    }
}

impl From<ProvisionalId> for MessageId {
    fn from(id: ProvisionalId) -> Self {
        Self(id.0)
    }
}

impl From<&ProvisionalId> for MessageId {
    fn from(id: &ProvisionalId) -> Self {
        Self(id.0.clone())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Build from a string
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get as `&str`
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Conversation (group) identifier assigned by the remote authority
    ConversationId
);

string_id!(
    /// User identifier assigned by the remote authority
    UserId
);

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Build from milliseconds since the epoch
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(i64::try_from(millis).unwrap_or(i64::MAX))
    }

    /// Milliseconds since the epoch
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Round down to a multiple of `granularity`. A zero granularity is a no-op.
    pub fn truncate(&self, granularity: Duration) -> Self {
        let step = duration_millis(granularity);
        if step == 0 {
            return *self;
        }
        Self(self.0.div_euclid(step) * step)
    }

    /// Subtract a duration, saturating at the numeric bounds
    pub fn saturating_sub(&self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration_millis(duration)))
    }

    /// Add a duration, saturating at the numeric bounds
    pub fn saturating_add(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration_millis(duration)))
    }

    /// Absolute distance between two timestamps
    pub fn abs_diff(&self, other: Timestamp) -> Duration {
        Duration::from_millis(self.0.abs_diff(other.0))
    }

    /// Parse an RFC 3339 / ISO 8601 timestamp such as `2024-05-01T10:00:00.123Z`.
    pub fn parse_rfc3339(value: &str) -> Option<Self> {
        chrono::DateTime::parse_from_rfc3339(value.trim())
            .ok()
            .map(|dt| Self(dt.timestamp_millis()))
    }

    /// Format as RFC 3339 with millisecond precision in UTC.
    pub fn to_rfc3339(&self) -> String {
        match chrono::DateTime::<chrono::Utc>::from_timestamp_millis(self.0) {
            Some(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            None => self.0.to_string(),
        }
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
