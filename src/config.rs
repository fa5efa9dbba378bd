//! Runtime configuration, read from the environment (and `.env` via dotenvy).

use chrono::Duration;
use std::time::Duration as StdDuration;
use tracing::warn;

use crate::storage::StorageConfig;

/// Default story lifetime
pub const DEFAULT_TTL_SECS: i64 = 24 * 60 * 60;

/// Upper bound for story lifetime and purge grace, about a century
pub const MAX_POLICY_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Story lifetime and expiry housekeeping
#[derive(Debug, Clone)]
pub struct StoryPolicy {
    /// Time from creation to expiry
    pub ttl: Duration,
    /// How long an expired story stays archived before it is hard-deleted
    pub purge_grace: Duration,
    /// Interval between sweeper passes
    pub sweep_interval: StdDuration,
}

impl Default for StoryPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
            purge_grace: Duration::days(7),
            sweep_interval: StdDuration::from_secs(60),
        }
    }
}

impl StoryPolicy {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_purge_grace(mut self, grace: Duration) -> Self {
        self.purge_grace = grace;
        self
    }

    pub fn with_sweep_interval(mut self, interval: StdDuration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Create from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ttl: env_parse("STORY_TTL_SECS")
                .filter(|secs: &i64| *secs > 0)
                .map(|secs| bounded_secs("STORY_TTL_SECS", secs))
                .unwrap_or(defaults.ttl),
            purge_grace: env_parse("PURGE_GRACE_SECS")
                .filter(|secs: &i64| *secs >= 0)
                .map(|secs| bounded_secs("PURGE_GRACE_SECS", secs))
                .unwrap_or(defaults.purge_grace),
            sweep_interval: env_parse("SWEEP_INTERVAL_SECS")
                .filter(|secs: &u64| *secs > 0)
                .map(StdDuration::from_secs)
                .unwrap_or(defaults.sweep_interval),
        }
    }
}

/// Everything the server binary needs to start
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub storage: StorageConfig,
    pub policy: StoryPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            storage: StorageConfig::default(),
            policy: StoryPolicy::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let storage = match std::env::var("STORAGE_PATH") {
            Ok(path) => StorageConfig::new(path),
            Err(_) => defaults.storage,
        };

        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            storage,
            policy: StoryPolicy::from_env(),
        }
    }
}

/// Seconds as a duration, clamped to [`MAX_POLICY_SECS`]
fn bounded_secs(key: &str, secs: i64) -> Duration {
    if secs > MAX_POLICY_SECS {
        warn!("{} = {} is out of range, using {}", key, secs, MAX_POLICY_SECS);
        return Duration::seconds(MAX_POLICY_SECS);
    }
    Duration::seconds(secs)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
