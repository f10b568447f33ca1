//! Configuration types for the sync layer

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Relay connection and retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Reconnect attempts per down-period before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay before each reconnect attempt
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// How often connectivity is polled
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Per-relay connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl ConnectionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_ms: 5_000,
            poll_interval_ms: 10_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Web-of-trust computation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WotConfig {
    /// Scores older than this are recomputed (5 hours)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Depth of the follow graph walk
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,

    /// Weight contributed by a direct follow
    #[serde(default = "default_first_hop_weight")]
    pub first_hop_weight: f64,

    /// Multiplier applied per extra hop
    #[serde(default = "default_hop_attenuation")]
    pub hop_attenuation: f64,

    /// Minimum score for a key to count as trusted
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    /// Timeout for each follow-list fetch
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,

    /// Authors per follow-list request
    #[serde(default = "default_author_batch_size")]
    pub author_batch_size: usize,
}

impl WotConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for WotConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60 * 60 * 5,
            max_hops: 2,
            first_hop_weight: 1.0,
            hop_attenuation: 0.5,
            min_score: 0.5,
            fetch_timeout_ms: 10_000,
            author_batch_size: 250,
        }
    }
}

/// Notification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    /// Whether events are turned into notifications at all
    #[serde(default)]
    pub enabled: bool,

    /// Size of the in-app recent notification list
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            recent_limit: 200,
        }
    }
}

/// Derived feed settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConfig {
    /// Drop direct messages from untrusted authors even when the relay
    /// filter already restricted them
    #[serde(default)]
    pub enforce_wot_on_messages: bool,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Default relays, also published as the user's relay list when none exists
    #[serde(default = "default_relays")]
    pub relays: Vec<String>,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub wot: WotConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub feeds: FeedConfig,

    /// Result limit for direct message filters
    #[serde(default = "default_message_limit")]
    pub message_limit: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relays: default_relays(),
            connection: ConnectionConfig::default(),
            wot: WotConfig::default(),
            notifications: NotificationConfig::default(),
            feeds: FeedConfig::default(),
            message_limit: default_message_limit(),
        }
    }
}

fn default_relays() -> Vec<String> {
    vec![
        "wss://relay.damus.io".into(),
        "wss://nos.lol".into(),
        "wss://relay.nostr.band".into(),
    ]
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    5_000
}

fn default_poll_interval() -> u64 {
    10_000
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_refresh_interval() -> u64 {
    60 * 60 * 5
}

fn default_max_hops() -> u32 {
    2
}

fn default_first_hop_weight() -> f64 {
    1.0
}

fn default_hop_attenuation() -> f64 {
    0.5
}

fn default_min_score() -> f64 {
    0.5
}

fn default_fetch_timeout() -> u64 {
    10_000
}

fn default_author_batch_size() -> usize {
    250
}

fn default_recent_limit() -> usize {
    200
}

fn default_message_limit() -> u64 {
    50_000
}
