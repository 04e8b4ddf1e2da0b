use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const GRACE_PERIOD_ENV: &str = "PROMISED_UNHANDLED_GRACE_MS";

/// Runtime settings, applied with [`crate::runtime::configure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long a rejection may stay unobserved before it is reported.
    pub unhandled_grace_ms: u64,
    /// Log unhandled rejections through `tracing` when nobody subscribed.
    pub log_unhandled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unhandled_grace_ms: 100,
            log_unhandled: true,
        }
    }
}

impl Config {
    /// Defaults, overridden by `PROMISED_UNHANDLED_GRACE_MS` when it holds a
    /// number.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(GRACE_PERIOD_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.unhandled_grace_ms = ms,
                Err(err) => tracing::warn!(%raw, %err, "ignoring invalid {}", GRACE_PERIOD_ENV),
            }
        }
        config
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.unhandled_grace_ms)
    }
}
