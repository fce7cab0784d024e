use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Tunables of the messaging core. `from_env` overrides any default from
/// `PARLEY_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Idle time after which a typing indicator is stale.
    pub typing_window: Duration,
    /// While typing continues, the `true` row is re-written this often.
    pub typing_refresh: Duration,
    /// Indicator rows older than this are deleted by the sweeper.
    pub stale_typing: Duration,
    /// Upper bound on message content, in bytes.
    pub max_message_len: usize,
    /// Attempts the resolver makes when a concurrent creation wins the race.
    pub resolve_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    /// Per-subscription buffer between the change feed and the consumer.
    pub subscription_buffer: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            typing_window: Duration::from_millis(2000),
            typing_refresh: Duration::from_millis(1000),
            stale_typing: Duration::from_secs(30),
            max_message_len: 10 * 1024,
            resolve_attempts: 3,
            retry_base: Duration::from_millis(100),
            retry_max: Duration::from_millis(5000),
            subscription_buffer: 256,
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            typing_window: env_millis("PARLEY_TYPING_WINDOW_MS", d.typing_window),
            typing_refresh: env_millis("PARLEY_TYPING_REFRESH_MS", d.typing_refresh),
            stale_typing: Duration::from_secs(env_parse("PARLEY_STALE_TYPING_SECS", d.stale_typing.as_secs())),
            max_message_len: env_parse("PARLEY_MAX_MESSAGE_LEN", d.max_message_len),
            resolve_attempts: env_parse("PARLEY_RESOLVE_ATTEMPTS", d.resolve_attempts).max(1),
            retry_base: env_millis("PARLEY_RETRY_BASE_MS", d.retry_base),
            retry_max: env_millis("PARLEY_RETRY_MAX_MS", d.retry_max),
            subscription_buffer: env_parse("PARLEY_SUBSCRIPTION_BUFFER", d.subscription_buffer).max(1),
        }
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_parse(key, default.as_millis() as u64))
}

fn env_parse<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
