use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for snapshot copy, dual-write retries, and outbound calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GriddleConfig {
    /// Documents per snapshot-copy bulk request.
    pub copy_batch_size: usize,
    /// Attempts per copy page before the migration fails.
    pub copy_max_retries: u32,
    /// Attempts for the target-side half of a dual write.
    pub write_max_retries: u32,
    /// Base backoff between retries; doubles per attempt, with jitter.
    pub retry_backoff_ms: u64,
    /// Per-call timeout for the HTTP transport.
    pub request_timeout_secs: u64,
}

impl Default for GriddleConfig {
    fn default() -> Self {
        GriddleConfig {
            copy_batch_size: 500,
            copy_max_retries: 3,
            write_max_retries: 3,
            retry_backoff_ms: 50,
            request_timeout_secs: 5,
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    match std::env::var(var) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("Invalid {}={:?}, using default", var, raw);
                default
            }
        },
        Err(_) => default,
    }
}

impl GriddleConfig {
    /// Build a config from `GRIDDLE_*` environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = GriddleConfig::default();
        GriddleConfig {
            copy_batch_size: env_parse("GRIDDLE_COPY_BATCH_SIZE", defaults.copy_batch_size),
            copy_max_retries: env_parse("GRIDDLE_COPY_MAX_RETRIES", defaults.copy_max_retries),
            write_max_retries: env_parse("GRIDDLE_WRITE_MAX_RETRIES", defaults.write_max_retries),
            retry_backoff_ms: env_parse("GRIDDLE_RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
            request_timeout_secs: env_parse(
                "GRIDDLE_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
        }
    }

    /// Exponential backoff with up to 50% random jitter. `attempt` is
    /// zero-based: attempt 0 waits ~base, attempt 1 ~2x base, and so on.
    pub(crate) fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry_backoff_ms.saturating_mul(1u64 << attempt.min(10));
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }
}
