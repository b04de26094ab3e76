use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "murmur_config.json";

/// Engine tunables, read from `<data_dir>/murmur_config.json`.
///
/// Every duration is in milliseconds. Missing keys take their defaults; an
/// unreadable or invalid file yields the defaults as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub disable_network: Option<bool>,
    pub remote_url: Option<String>,
    pub remote_api_key: Option<String>,

    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub degraded_after_ms: u64,
    pub dead_after_ms: u64,
    pub reconnect_backoff_base_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    pub max_reconnect_attempts: u32,

    pub send_backoff_base_ms: u64,
    pub send_backoff_max_ms: u64,
    pub send_backoff_jitter: f64,
    pub max_send_attempts: u32,
    pub outbox_poll_interval_ms: u64,
    pub outbox_batch_size: usize,
    // Publish the canonical id to the wake fanout after a confirmed send.
    pub client_wake_fanout: bool,

    pub dedup_window_ms: u64,
    pub dedup_granularity_ms: u64,
    pub catch_up_page_size: usize,
    // Catch-up starts this far before the recorded death time.
    pub catch_up_skew_ms: u64,
    pub bootstrap_message_count: usize,
    pub wake_fallback_window_ms: u64,
    pub watermark_retry_limit: u32,
    pub max_subscribers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            disable_network: None,
            remote_url: None,
            remote_api_key: None,
            request_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 15_000,
            degraded_after_ms: 30_000,
            dead_after_ms: 45_000,
            reconnect_backoff_base_ms: 1_000,
            reconnect_backoff_max_ms: 60_000,
            max_reconnect_attempts: 8,
            send_backoff_base_ms: 1_000,
            send_backoff_max_ms: 300_000,
            send_backoff_jitter: 0.2,
            max_send_attempts: 6,
            outbox_poll_interval_ms: 5_000,
            outbox_batch_size: 50,
            client_wake_fanout: true,
            dedup_window_ms: 10_000,
            dedup_granularity_ms: 1_000,
            catch_up_page_size: 200,
            catch_up_skew_ms: 5_000,
            bootstrap_message_count: 50,
            wake_fallback_window_ms: 600_000,
            watermark_retry_limit: 5,
            max_subscribers: 8,
        }
    }
}

pub fn load_sync_config(data_dir: &str) -> SyncConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    let Ok(bytes) = std::fs::read(&path) else {
        return SyncConfig::default();
    };
    match serde_json::from_slice::<SyncConfig>(&bytes) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), %e, "invalid config, using defaults");
            SyncConfig::default()
        }
    }
}

/// The JSON written when no config file exists yet.
pub fn default_config_json() -> String {
    serde_json::to_string_pretty(&SyncConfig::default()).unwrap_or_else(|_| "{}".to_string())
}

impl SyncConfig {
    pub fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.disable_network {
            return !disable;
        }
        std::env::var("MURMUR_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }

    pub fn remote_url(&self) -> Option<String> {
        if let Some(url) = &self.remote_url {
            if !url.is_empty() {
                return Some(url.clone());
            }
        }
        std::env::var("MURMUR_REMOTE_URL")
            .ok()
            .filter(|url| !url.is_empty())
    }

    pub fn remote_api_key(&self) -> Option<String> {
        if let Some(key) = &self.remote_api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        std::env::var("MURMUR_REMOTE_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn degraded_after(&self) -> Duration {
        Duration::from_millis(self.degraded_after_ms)
    }

    pub fn dead_after(&self) -> Duration {
        Duration::from_millis(self.dead_after_ms.max(self.degraded_after_ms))
    }

    pub fn reconnect_backoff(&self) -> crate::backoff::Backoff {
        crate::backoff::Backoff::new(
            Duration::from_millis(self.reconnect_backoff_base_ms),
            Duration::from_millis(self.reconnect_backoff_max_ms),
            0.0,
        )
    }

    pub fn send_backoff(&self) -> crate::backoff::Backoff {
        crate::backoff::Backoff::new(
            Duration::from_millis(self.send_backoff_base_ms),
            Duration::from_millis(self.send_backoff_max_ms),
            self.send_backoff_jitter,
        )
    }

    pub fn outbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.outbox_poll_interval_ms.max(1))
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn dedup_granularity(&self) -> Duration {
        Duration::from_millis(self.dedup_granularity_ms)
    }

    pub fn catch_up_skew(&self) -> Duration {
        Duration::from_millis(self.catch_up_skew_ms)
    }

    pub fn wake_fallback_window(&self) -> Duration {
        Duration::from_millis(self.wake_fallback_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_sync_config(dir.path().to_str().unwrap());
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{"heartbeat_interval_ms": 250, "disable_network": true}"#,
        )
        .unwrap();

        let config = load_sync_config(dir.path().to_str().unwrap());
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(250));
        assert!(!config.network_enabled());
        assert_eq!(config.max_send_attempts, 6);
    }

    #[test]
    fn test_invalid_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "not json").unwrap();
        let config = load_sync_config(dir.path().to_str().unwrap());
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_default_json_parses_back() {
        let config: SyncConfig = serde_json::from_str(&default_config_json()).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_dead_threshold_never_below_degraded() {
        let config = SyncConfig {
            degraded_after_ms: 500,
            dead_after_ms: 100,
            ..SyncConfig::default()
        };
        assert_eq!(config.dead_after(), Duration::from_millis(500));
    }
}
