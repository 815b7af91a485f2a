//! Client configuration: the knobs the spec calls out as
//! "global mutable configuration... to enable testing", reshaped as
//! per-client fields rather than process-wide statics.
//!
//! Mirrors the teacher's `Config`/`ExchangeConfig` shape (a plain
//! `Deserialize`-able struct with `Option<T>` fields defaulted in code),
//! but adds a builder, since in practice these clients are constructed
//! programmatically by a factory layer rather than loaded whole from
//! JSON. JSON loading is kept (`ClientConfig::from_json_file`) for parity
//! with the teacher's `load_config`.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Connection and protocol timing knobs. Every field has a production
/// default; tests override `auth_retry_delay_multiplier` to zero so
/// retry loops don't actually sleep.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// WebSocket base URL (already feed-specific, e.g. `.../v2/iex`).
    pub url: String,

    /// API key. Falls back to an environment variable via
    /// [`crate::util::env_or`] when the caller passes an empty string
    /// through the builder convenience constructors.
    pub key: String,

    /// API secret, or an access token when `use_access_token` is set.
    pub secret: String,

    /// Sends `{action:"access_token", ...}` instead of `{action:"auth", ...}`.
    #[serde(default)]
    pub use_access_token: bool,

    /// `0` means unlimited reconnect attempts.
    #[serde(default = "default_reconnect_limit")]
    pub reconnect_limit: u32,

    /// Linear backoff unit: sleep `failed_attempts_in_a_row * reconnect_delay`.
    #[serde(default = "default_reconnect_delay", with = "duration_ms")]
    pub reconnect_delay: Duration,

    /// Number of processor tasks consuming the inbound channel.
    #[serde(default = "default_processor_count")]
    pub processor_count: usize,

    /// Capacity of the inbound frame channel. `0` is legal (pure rendezvous).
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Attempts in the auth-retry loop (§4.2).
    #[serde(default = "default_auth_retry_count")]
    pub auth_retry_count: u32,

    /// Multiplier on the 500ms auth-retry backoff unit. Tests set this
    /// to 0 so the retry loop never actually sleeps.
    #[serde(default = "default_auth_retry_delay_multiplier")]
    pub auth_retry_delay_multiplier: u32,

    /// Deadline for each initialization step (welcome / auth / subscribe).
    #[serde(default = "default_init_timeout", with = "duration_ms")]
    pub init_timeout: Duration,

    /// Deadline for a single write.
    #[serde(default = "default_write_timeout", with = "duration_ms")]
    pub write_timeout: Duration,

    /// Deadline for a single ping.
    #[serde(default = "default_ping_timeout", with = "duration_ms")]
    pub ping_timeout: Duration,

    /// Ping period.
    #[serde(default = "default_ping_period", with = "duration_ms")]
    pub ping_period: Duration,

    /// Sub-change round-trip timeout.
    #[serde(default = "default_sub_change_timeout", with = "duration_ms")]
    pub sub_change_timeout: Duration,

    /// Product-identifying header sent on every dial.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_reconnect_limit() -> u32 {
    20
}
fn default_reconnect_delay() -> Duration {
    Duration::from_secs(1)
}
fn default_processor_count() -> usize {
    1
}
fn default_buffer_size() -> usize {
    100_000
}
fn default_auth_retry_count() -> u32 {
    15
}
fn default_auth_retry_delay_multiplier() -> u32 {
    1
}
fn default_init_timeout() -> Duration {
    Duration::from_secs(3)
}
fn default_write_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_ping_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_ping_period() -> Duration {
    Duration::from_secs(10)
}
fn default_sub_change_timeout() -> Duration {
    Duration::from_secs(3)
}
fn default_user_agent() -> String {
    concat!("market-stream-core/", env!("CARGO_PKG_VERSION")).to_string()
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(de: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(de)?;
        Ok(Duration::from_millis(ms))
    }
}

impl ClientConfig {
    pub fn builder(url: impl Into<String>, key: impl Into<String>, secret: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(url, key, secret)
    }

    /// Loads a config from a JSON file, the same way the teacher's
    /// `load_config` reads `config.json` for the collector binary.
    pub fn from_json_file(path: &str) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Builder for [`ClientConfig`]. All timing knobs start at their
/// production defaults; override only what a test or caller needs.
pub struct ClientConfigBuilder {
    cfg: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new(url: impl Into<String>, key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            cfg: ClientConfig {
                url: url.into(),
                key: key.into(),
                secret: secret.into(),
                use_access_token: false,
                reconnect_limit: default_reconnect_limit(),
                reconnect_delay: default_reconnect_delay(),
                processor_count: default_processor_count(),
                buffer_size: default_buffer_size(),
                auth_retry_count: default_auth_retry_count(),
                auth_retry_delay_multiplier: default_auth_retry_delay_multiplier(),
                init_timeout: default_init_timeout(),
                write_timeout: default_write_timeout(),
                ping_timeout: default_ping_timeout(),
                ping_period: default_ping_period(),
                sub_change_timeout: default_sub_change_timeout(),
                user_agent: default_user_agent(),
            },
        }
    }

    pub fn use_access_token(mut self, yes: bool) -> Self {
        self.cfg.use_access_token = yes;
        self
    }

    pub fn reconnect_limit(mut self, limit: u32) -> Self {
        self.cfg.reconnect_limit = limit;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.cfg.reconnect_delay = delay;
        self
    }

    pub fn processor_count(mut self, count: usize) -> Self {
        self.cfg.processor_count = count.max(1);
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.cfg.buffer_size = size;
        self
    }

    pub fn auth_retry_count(mut self, count: u32) -> Self {
        self.cfg.auth_retry_count = count;
        self
    }

    pub fn auth_retry_delay_multiplier(mut self, multiplier: u32) -> Self {
        self.cfg.auth_retry_delay_multiplier = multiplier;
        self
    }

    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.init_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.write_timeout = timeout;
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.ping_timeout = timeout;
        self
    }

    pub fn ping_period(mut self, period: Duration) -> Self {
        self.cfg.ping_period = period;
        self
    }

    pub fn sub_change_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.sub_change_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.cfg.user_agent = ua.into();
        self
    }

    pub fn build(self) -> ClientConfig {
        self.cfg
    }
}

/// Optional lifecycle callbacks (§6's "optional connect/disconnect/buffer-fill
/// callbacks"). Stored alongside the config rather than inside it since
/// `ClientConfig` itself stays `Deserialize`-able and these aren't.
#[derive(Clone, Default)]
pub struct ClientCallbacks {
    pub on_connect: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_disconnect: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_buffer_fill: Option<Arc<dyn Fn(usize) + Send + Sync>>,
}
