//! Centralized configuration for wirecall.
//!
//! Constant tables hold the defaults; `SessionOptions` carries the values a
//! session actually runs with and can be overridden from the environment.

use crate::error::{Result, WirecallError};
use std::time::Duration;

/// Transport and framing limits.
pub struct TransportConfig;

impl TransportConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const READ_BUFFER_SIZE: usize = 8192;
    pub const OUTBOUND_QUEUE_DEPTH: usize = 256;
    pub const MAX_SERVER_CONNECTIONS: usize = 1024;
    pub const MEMORY_PIPE_CAPACITY: usize = 64 * 1024;
}

/// Outbound call defaults.
pub struct CallConfig;

impl CallConfig {
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;
}

/// Environment variables read by [`SessionOptions::from_env`].
pub struct EnvConfig;

impl EnvConfig {
    pub const CONNECT_TIMEOUT_MS: &'static str = "WIRECALL_CONNECT_TIMEOUT_MS";
    pub const CALL_TIMEOUT_MS: &'static str = "WIRECALL_CALL_TIMEOUT_MS";
    pub const SWEEP_INTERVAL_MS: &'static str = "WIRECALL_SWEEP_INTERVAL_MS";
}

/// Runtime options for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Age after which a pending call is failed with `Timeout`.
    pub call_timeout: Duration,
    /// How often the expiry sweep runs while connected.
    pub sweep_interval: Duration,
    /// Size of each read from the underlying stream.
    pub read_buffer_size: usize,
    /// Encoded messages queued for the writer before `send` waits.
    pub outbound_queue_depth: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: TransportConfig::CONNECT_TIMEOUT,
            call_timeout: CallConfig::DEFAULT_CALL_TIMEOUT,
            sweep_interval: CallConfig::SWEEP_INTERVAL,
            read_buffer_size: TransportConfig::READ_BUFFER_SIZE,
            outbound_queue_depth: TransportConfig::OUTBOUND_QUEUE_DEPTH,
        }
    }
}

impl SessionOptions {
    /// Defaults overridden by any `WIRECALL_*_MS` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = Self::default();
        if let Some(ms) = millis(&lookup, EnvConfig::CONNECT_TIMEOUT_MS)? {
            options.connect_timeout = ms;
        }
        if let Some(ms) = millis(&lookup, EnvConfig::CALL_TIMEOUT_MS)? {
            options.call_timeout = ms;
        }
        if let Some(ms) = millis(&lookup, EnvConfig::SWEEP_INTERVAL_MS)? {
            options.sweep_interval = ms;
        }
        Ok(options)
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(WirecallError::Config {
            message: format!("{} must be a positive integer, got {:?}", key, raw),
        }),
        Ok(ms) => Ok(Some(Duration::from_millis(ms))),
    }
}
