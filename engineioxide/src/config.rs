//! Engine.IO server configuration.

use std::time::Duration;

/// Default ping interval: how often the server pings an idle connection.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(25_000);
/// Default ping timeout: how long the server waits for a pong before
/// declaring the connection dead.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(20_000);
/// Default maximum size, in bytes, of a single HTTP long-polling payload.
pub const DEFAULT_MAX_PAYLOAD: u64 = 1_000_000;
/// Default HTTP path the Engine.IO service is mounted on.
pub const DEFAULT_PATH: &str = "/engine.io/";

/// Runtime configuration for an [`EngineIo`](crate::engine::EngineIo) instance.
#[derive(Debug, Clone)]
pub struct EngineIoConfig {
    /// Interval between two server-initiated pings.
    pub ping_interval: Duration,
    /// How long the server waits for a pong after a ping before timing out.
    pub ping_timeout: Duration,
    /// Maximum size in bytes of a single HTTP long-polling response body.
    pub max_payload: u64,
    /// HTTP path this service answers on.
    pub req_path: String,
}

impl Default for EngineIoConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            max_payload: DEFAULT_MAX_PAYLOAD,
            req_path: DEFAULT_PATH.to_string(),
        }
    }
}

impl EngineIoConfig {
    /// Starts building a config from the protocol defaults.
    pub fn builder() -> EngineIoConfigBuilder {
        EngineIoConfigBuilder::default()
    }

    /// Builds a config from `PING_INTERVAL_MS`, `PING_TIMEOUT_MS` and
    /// `MAX_PAYLOAD_BYTES` environment variables, falling back to the
    /// protocol defaults when a variable is absent or fails to parse.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(ms) = env_u64("PING_INTERVAL_MS") {
            cfg.ping_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("PING_TIMEOUT_MS") {
            cfg.ping_timeout = Duration::from_millis(ms);
        }
        if let Some(bytes) = env_u64("MAX_PAYLOAD_BYTES") {
            cfg.max_payload = bytes;
        }
        cfg
    }

    /// `(pingInterval + pingTimeout)`, the HTTP long-poll block timeout.
    pub fn long_poll_timeout(&self) -> Duration {
        self.ping_interval + self.ping_timeout
    }
}

fn env_u64(name: &str) -> Option<u64> {
    match std::env::var(name) {
        Ok(v) => match v.parse() {
            Ok(n) => Some(n),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("ignoring unparsable {name}={v:?}: {_e}");
                None
            }
        },
        Err(_) => None,
    }
}

/// Builder for [`EngineIoConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineIoConfigBuilder {
    config: EngineIoConfig,
}

impl EngineIoConfigBuilder {
    /// Overrides the ping interval.
    pub fn ping_interval(mut self, d: Duration) -> Self {
        self.config.ping_interval = d;
        self
    }
    /// Overrides the ping timeout.
    pub fn ping_timeout(mut self, d: Duration) -> Self {
        self.config.ping_timeout = d;
        self
    }
    /// Overrides the maximum HTTP payload size, in bytes.
    pub fn max_payload(mut self, bytes: u64) -> Self {
        self.config.max_payload = bytes;
        self
    }
    /// Overrides the HTTP path this service is mounted on.
    pub fn req_path(mut self, path: impl Into<String>) -> Self {
        self.config.req_path = path.into();
        self
    }
    /// Finishes the builder.
    pub fn build(self) -> EngineIoConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let cfg = EngineIoConfig::default();
        assert_eq!(cfg.ping_interval, Duration::from_millis(25_000));
        assert_eq!(cfg.ping_timeout, Duration::from_millis(20_000));
        assert_eq!(cfg.max_payload, 1_000_000);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = EngineIoConfig::builder()
            .ping_interval(Duration::from_millis(1000))
            .max_payload(42)
            .build();
        assert_eq!(cfg.ping_interval, Duration::from_millis(1000));
        assert_eq!(cfg.max_payload, 42);
        assert_eq!(cfg.ping_timeout, DEFAULT_PING_TIMEOUT);
    }
}
