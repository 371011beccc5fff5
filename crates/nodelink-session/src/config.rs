//! Session configuration.

use std::time::Duration;

use nodelink_protocol::LogLevel;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tunables for one device session.
///
/// Serializable so that a caller can load it from whatever config format
/// it already uses. Call [`validated`](Self::validated) (the client
/// builder does) before handing it to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Free-form client identification sent in the hello.
    pub client_info: String,
    /// Password sent in the connect request. Empty for none.
    pub password: String,
    /// Time between keepalive pings once the entity listing is done.
    pub keepalive_interval: Duration,
    /// Random extra delay added to each keepalive, `0..=jitter`.
    pub keepalive_jitter: Duration,
    /// How long to wait for a ping response before giving up on the node.
    /// `None` disables the watchdog.
    pub ping_timeout: Option<Duration>,
    /// How long a local disconnect waits for the node to acknowledge
    /// before the socket is closed anyway.
    pub disconnect_grace: Duration,
    /// Pause between the socket opening and the hello being sent.
    pub settle_delay: Duration,
    /// Log subscription threshold. `None` skips the log subscription.
    pub subscribe_logs: Option<LogLevel>,
    /// Ask the node to dump its configuration into the log stream.
    pub dump_config: bool,
    /// If set, log every frame in and out for this long after the
    /// session opens.
    pub frame_trace: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_info: concat!("nodelink ", env!("CARGO_PKG_VERSION")).to_string(),
            password: String::new(),
            keepalive_interval: Duration::from_secs(15),
            keepalive_jitter: Duration::from_secs(1),
            ping_timeout: Some(Duration::from_secs(10)),
            disconnect_grace: Duration::from_secs(5),
            settle_delay: Duration::from_millis(100),
            subscribe_logs: Some(LogLevel::Info),
            dump_config: false,
            frame_trace: None,
        }
    }
}

impl SessionConfig {
    /// Shortest keepalive interval accepted.
    pub const MIN_KEEPALIVE: Duration = Duration::from_secs(1);

    /// Longest value accepted for any of the timing settings.
    pub const MAX_DELAY: Duration = Duration::from_secs(86_400);

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Rules:
    /// - `keepalive_interval` raised to at least [`Self::MIN_KEEPALIVE`].
    /// - `keepalive_jitter` capped to the keepalive interval.
    /// - A zero `ping_timeout` disables the watchdog.
    /// - A zero `disconnect_grace` becomes one second.
    /// - An empty `client_info` falls back to the default.
    /// - Every timing setting is capped to [`Self::MAX_DELAY`].
    pub fn validated(mut self) -> Self {
        for (name, value) in [
            ("keepalive_interval", &mut self.keepalive_interval),
            ("disconnect_grace", &mut self.disconnect_grace),
            ("settle_delay", &mut self.settle_delay),
        ] {
            cap(name, value);
        }
        for (name, value) in [
            ("ping_timeout", &mut self.ping_timeout),
            ("frame_trace", &mut self.frame_trace),
        ] {
            if let Some(value) = value {
                cap(name, value);
            }
        }
        if self.keepalive_interval < Self::MIN_KEEPALIVE {
            warn!(
                interval_ms = self.keepalive_interval.as_millis() as u64,
                "keepalive_interval below minimum, clamping"
            );
            self.keepalive_interval = Self::MIN_KEEPALIVE;
        }
        if self.keepalive_jitter > self.keepalive_interval {
            warn!("keepalive_jitter exceeds keepalive_interval, clamping");
            self.keepalive_jitter = self.keepalive_interval;
        }
        if self.ping_timeout == Some(Duration::ZERO) {
            warn!("ping_timeout of zero, disabling ping watchdog");
            self.ping_timeout = None;
        }
        if self.disconnect_grace.is_zero() {
            warn!("disconnect_grace of zero, using 1s");
            self.disconnect_grace = Duration::from_secs(1);
        }
        if self.client_info.trim().is_empty() {
            self.client_info = Self::default().client_info;
        }
        self
    }
}

fn cap(name: &str, value: &mut Duration) {
    if *value > SessionConfig::MAX_DELAY {
        warn!(setting = name, secs = value.as_secs(), "duration above maximum, clamping");
        *value = SessionConfig::MAX_DELAY;
    }
}
