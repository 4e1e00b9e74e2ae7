//! Centralized configuration for lerpc.
//!
//! Protocol-wide constants live on [`ProtocolConfig`]; the construction
//! configs for the executor, server and client default to them and can be
//! adjusted with the `with_*` builders.

use std::time::Duration;

/// Protocol-wide defaults.
pub struct ProtocolConfig;

impl ProtocolConfig {
    pub const DEFAULT_PORT: u16 = 3000;
    pub const DEFAULT_HOST: &'static str = "0.0.0.0";

    // Executor
    pub const QUEUE_CAPACITY: usize = 65_536;
    pub const TICK_INTERVAL: Duration = Duration::from_millis(1);
    /// Shortest loop period the executor runs at; tokio timers resolve to
    /// whole milliseconds.
    pub const MIN_LOOP_PERIOD: Duration = Duration::from_millis(1);
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

    // Server transport
    pub const OUTBOUND_CAPACITY: usize = 1024;
    pub const DOWNLOAD_LIFETIME: Duration = Duration::from_secs(5);
    pub const DOWNLOAD_LIMIT: u32 = 5;
    pub const FALLBACK_ERROR_MESSAGE: &'static str = "error";

    // Client
    pub const MAX_ATTEMPTS: u32 = 10;
    pub const PENDING_HORIZON: Duration = Duration::from_secs(60);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const POOL_SIZE: usize = 1;
}

/// Executor construction settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of queued requests; pushes beyond it are rejected.
    pub queue_capacity: usize,
    /// Interval of the consumer loop. At most one entry is popped per tick.
    ///
    /// Values below [`ProtocolConfig::MIN_LOOP_PERIOD`] run at that period,
    /// which caps dequeue throughput at 1000 entries per second.
    pub tick_interval: Duration,
    /// Interval of the download registry sweep.
    pub sweep_interval: Duration,
    /// Upper bound on a single handler execution. `None` leaves it unbounded.
    pub handler_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: ProtocolConfig::QUEUE_CAPACITY,
            tick_interval: ProtocolConfig::TICK_INTERVAL,
            sweep_interval: ProtocolConfig::SWEEP_INTERVAL,
            handler_timeout: None,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Tick period the consumer loop actually runs at.
    pub fn effective_tick_interval(&self) -> Duration {
        self.tick_interval.max(ProtocolConfig::MIN_LOOP_PERIOD)
    }

    /// Sweep period the download sweep loop actually runs at.
    pub fn effective_sweep_interval(&self) -> Duration {
        self.sweep_interval.max(ProtocolConfig::MIN_LOOP_PERIOD)
    }
}

/// Server construction settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// Port to listen on (0 = OS-assigned).
    pub port: u16,
    pub executor: ExecutorConfig,
    /// Capacity of each WebSocket connection's outbound channel.
    pub outbound_capacity: usize,
    /// Default lifetime for download entries registered by handlers.
    pub download_lifetime: Duration,
    /// Default use limit for download entries registered by handlers.
    pub download_limit: u32,
    /// Send internal fault messages verbatim instead of a generic message.
    pub expose_errors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: ProtocolConfig::DEFAULT_HOST.to_string(),
            port: ProtocolConfig::DEFAULT_PORT,
            executor: ExecutorConfig::default(),
            outbound_capacity: ProtocolConfig::OUTBOUND_CAPACITY,
            download_lifetime: ProtocolConfig::DOWNLOAD_LIFETIME,
            download_limit: ProtocolConfig::DOWNLOAD_LIMIT,
            expose_errors: false,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    pub fn with_download_defaults(mut self, lifetime: Duration, limit: u32) -> Self {
        self.download_lifetime = lifetime;
        self.download_limit = limit;
        self
    }

    pub fn with_expose_errors(mut self, expose: bool) -> Self {
        self.expose_errors = expose;
        self
    }

    /// Socket address string to bind.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Transport selection for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientMode {
    /// Prefer the duplex transport, fall back to request/reply on failure.
    Balanced = 0,
    HttpOnly = 1,
    WebsocketOnly = 2,
}

impl ClientMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientMode::Balanced => "balanced",
            ClientMode::HttpOnly => "http",
            ClientMode::WebsocketOnly => "websocket",
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ClientMode::Balanced),
            1 => Some(ClientMode::HttpOnly),
            2 => Some(ClientMode::WebsocketOnly),
            _ => None,
        }
    }
}

impl Default for ClientMode {
    fn default() -> Self {
        ClientMode::Balanced
    }
}

impl std::fmt::Display for ClientMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a Balanced client does after a duplex failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DemotionPolicy {
    /// Switch the client to `HttpOnly` until `reset_mode()` is called.
    #[default]
    Sticky,
    /// Fall back for the failing call only.
    PerCall,
}

/// Client construction settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Remote `host:port`, without scheme.
    pub address: String,
    /// Bearer token injected into every request.
    pub token: String,
    pub mode: ClientMode,
    /// Use `https`/`wss` instead of `http`/`ws`.
    pub secure: bool,
    /// Skip TLS certificate verification.
    pub accept_invalid_certs: bool,
    /// Number of pooled WebSocket connections.
    pub pool_size: usize,
    /// Attempt budget for a single `execute` call.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// How long a WebSocket call waits for its reply.
    pub reply_timeout: Duration,
    /// Age after which unanswered pending replies are swept.
    pub pending_horizon: Duration,
    /// Timeout for a single HTTP request.
    pub request_timeout: Duration,
    pub demotion: DemotionPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("localhost:{}", ProtocolConfig::DEFAULT_PORT),
            token: String::new(),
            mode: ClientMode::default(),
            secure: false,
            accept_invalid_certs: false,
            pool_size: ProtocolConfig::POOL_SIZE,
            max_attempts: ProtocolConfig::MAX_ATTEMPTS,
            retry_delay: Duration::ZERO,
            reply_timeout: ProtocolConfig::PENDING_HORIZON,
            pending_horizon: ProtocolConfig::PENDING_HORIZON,
            request_timeout: ProtocolConfig::REQUEST_TIMEOUT,
            demotion: DemotionPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ClientMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_pending_horizon(mut self, horizon: Duration) -> Self {
        self.pending_horizon = horizon;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_demotion(mut self, demotion: DemotionPolicy) -> Self {
        self.demotion = demotion;
        self
    }

    /// URL of the request/reply endpoint.
    pub fn execute_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}/execute", scheme, self.address)
    }

    /// URL of the duplex endpoint.
    pub fn connect_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}/connect", scheme, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_mode_roundtrip() {
        for mode in [
            ClientMode::Balanced,
            ClientMode::HttpOnly,
            ClientMode::WebsocketOnly,
        ] {
            assert_eq!(ClientMode::from_u8(mode as u8), Some(mode));
        }
        assert_eq!(ClientMode::from_u8(7), None);
    }

    #[test]
    fn test_client_urls() {
        let config = ClientConfig::new("example.org:8443", "t");
        assert_eq!(config.execute_url(), "http://example.org:8443/execute");
        assert_eq!(config.connect_url(), "ws://example.org:8443/connect");

        let config = config.with_secure(true);
        assert_eq!(config.execute_url(), "https://example.org:8443/execute");
        assert_eq!(config.connect_url(), "wss://example.org:8443/connect");
    }

    #[test]
    fn test_sub_millisecond_tick_runs_at_minimum_period() {
        let config = ExecutorConfig::new().with_tick_interval(Duration::from_micros(100));
        assert_eq!(config.tick_interval, Duration::from_micros(100));
        assert_eq!(config.effective_tick_interval(), ProtocolConfig::MIN_LOOP_PERIOD);

        let config = config.with_tick_interval(Duration::from_millis(5));
        assert_eq!(config.effective_tick_interval(), Duration::from_millis(5));

        let config = config.with_sweep_interval(Duration::ZERO);
        assert_eq!(config.effective_sweep_interval(), ProtocolConfig::MIN_LOOP_PERIOD);
    }

    #[test]
    fn test_defaults_are_reasonable() {
        let executor = ExecutorConfig::default();
        assert!(executor.queue_capacity > 0);
        assert!(executor.tick_interval > Duration::ZERO);
        assert!(executor.handler_timeout.is_none());

        let server = ServerConfig::default();
        assert_eq!(server.addr(), "0.0.0.0:3000");
        assert_eq!(server.outbound_capacity, 1024);

        let client = ClientConfig::default();
        assert_eq!(client.max_attempts, 10);
        assert_eq!(client.demotion, DemotionPolicy::Sticky);
    }
}
