//! Transport-selecting RPC client.
//!
//! [`Client::execute`] sends a request over the current [`ClientMode`] and
//! retries failed attempts up to `max_attempts`. Errors that another attempt
//! cannot fix (see [`LerpcError::is_retryable`]) end the call at once. In `Balanced` mode the first
//! attempt goes over the WebSocket pool; a failure demotes the call to HTTP,
//! and under [`DemotionPolicy::Sticky`] the whole client stays on HTTP until
//! [`Client::reset_mode`].

mod http;
mod ws;

pub use http::HttpTransport;
pub use ws::WsPool;

use crate::config::{ClientConfig, ClientMode, DemotionPolicy};
use crate::promise::Promise;
use crate::proto::{Request, RpcResult};
use crate::{LerpcError, Result};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened across the attempts of one call.
#[derive(Debug, Clone, Default)]
pub struct AttemptStats {
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Times the call moved from the duplex path to HTTP.
    pub fallbacks: u32,
    pub success: bool,
    /// Last error message if an attempt failed.
    pub last_error: Option<String>,
}

struct ClientInner {
    config: ClientConfig,
    mode: AtomicU8,
    http: HttpTransport,
    ws: WsPool,
}

/// RPC client. Cheap to clone; clones share connections and mode.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.max_attempts == 0 {
            return Err(LerpcError::Config {
                message: "max_attempts must be at least 1".to_string(),
            });
        }

        let http = HttpTransport::new(&config)?;
        let ws = WsPool::new(&config);
        Ok(Self {
            inner: Arc::new(ClientInner {
                mode: AtomicU8::new(config.mode as u8),
                config,
                http,
                ws,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Dial the WebSocket pool. Does nothing for an HTTP-only client.
    pub async fn start(&self) -> Result<()> {
        if self.inner.config.mode == ClientMode::HttpOnly {
            return Ok(());
        }
        self.inner.ws.start().await
    }

    /// Current mode, which may differ from the configured one after a sticky
    /// demotion.
    pub fn mode(&self) -> ClientMode {
        ClientMode::from_u8(self.inner.mode.load(Ordering::SeqCst)).unwrap_or_default()
    }

    pub fn set_mode(&self, mode: ClientMode) {
        self.inner.mode.store(mode as u8, Ordering::SeqCst);
    }

    /// Restore the configured mode.
    pub fn reset_mode(&self) {
        self.set_mode(self.inner.config.mode);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.ws.is_connected()
    }

    /// Execute with retry and fallback.
    pub async fn execute(&self, request: Request) -> Result<RpcResult> {
        self.execute_traced(request).await.0
    }

    /// Execute with retry and fallback, reporting what the attempts did.
    pub async fn execute_traced(&self, request: Request) -> (Result<RpcResult>, AttemptStats) {
        let config = &self.inner.config;
        let request = self.prepare(request);
        let mut stats = AttemptStats::default();
        let mut mode = self.mode();

        for attempt in 1..=config.max_attempts {
            stats.attempts = attempt;

            match self.dispatch(request.clone(), mode).await {
                Ok(result) => {
                    stats.success = true;
                    if attempt > 1 {
                        debug!(
                            "{} succeeded after {} attempts via {}",
                            request.route(),
                            attempt,
                            mode
                        );
                    }
                    return (Ok(result), stats);
                }
                Err(e) => {
                    warn!(
                        namespace = %request.namespace,
                        method = %request.method,
                        "Attempt {}/{} via {} failed: {}",
                        attempt,
                        config.max_attempts,
                        mode,
                        e
                    );
                    stats.last_error = Some(e.to_string());

                    // A duplex failure in Balanced mode always falls back,
                    // whatever the error.
                    if mode == ClientMode::Balanced {
                        mode = ClientMode::HttpOnly;
                        stats.fallbacks += 1;
                        if config.demotion == DemotionPolicy::Sticky {
                            self.set_mode(ClientMode::HttpOnly);
                        }
                    } else if !e.is_retryable() {
                        debug!("Error is not retryable: {}", e);
                        return (Err(e), stats);
                    }

                    if attempt < config.max_attempts && !config.retry_delay.is_zero() {
                        tokio::time::sleep(config.retry_delay).await;
                    }
                }
            }
        }

        (
            Err(LerpcError::TooManyAttempts {
                attempts: config.max_attempts,
            }),
            stats,
        )
    }

    /// Single attempt over `mode`, without retry or fallback.
    pub async fn execute_mode(&self, request: Request, mode: ClientMode) -> Result<RpcResult> {
        self.dispatch(self.prepare(request), mode).await
    }

    /// Run [`execute`](Self::execute) on a new task.
    pub fn execute_async(&self, request: Request) -> Promise<RpcResult> {
        let client = self.clone();
        Promise::spawn(async move { client.execute(request).await })
    }

    /// Close pooled connections. Pending WebSocket calls fail.
    pub async fn close(&self) {
        self.inner.ws.close().await;
    }

    fn prepare(&self, mut request: Request) -> Request {
        if !self.inner.config.token.is_empty() {
            request.token = self.inner.config.token.clone();
        }
        request
    }

    async fn dispatch(&self, request: Request, mode: ClientMode) -> Result<RpcResult> {
        match mode {
            ClientMode::HttpOnly => self.inner.http.execute(&request).await,
            ClientMode::WebsocketOnly | ClientMode::Balanced => self.inner.ws.execute(request).await,
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.inner.config.address)
            .field("mode", &self.mode())
            .field("http", &self.inner.http)
            .field("ws", &self.inner.ws)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    // Nothing listens on port 1, so every attempt fails fast.
    const DEAD_ADDRESS: &str = "127.0.0.1:1";

    fn client(mode: ClientMode, demotion: DemotionPolicy) -> Client {
        Client::new(
            ClientConfig::new(DEAD_ADDRESS, "secret")
                .with_mode(mode)
                .with_demotion(demotion)
                .with_max_attempts(3),
        )
        .unwrap()
    }

    #[test]
    fn test_zero_attempt_budget_rejected() {
        let result = Client::new(ClientConfig::new(DEAD_ADDRESS, "").with_max_attempts(0));
        assert!(matches!(result, Err(LerpcError::Config { .. })));
    }

    #[tokio::test]
    async fn test_mode_set_and_reset() {
        let client = client(ClientMode::WebsocketOnly, DemotionPolicy::Sticky);
        assert_eq!(client.mode(), ClientMode::WebsocketOnly);
        client.set_mode(ClientMode::HttpOnly);
        assert_eq!(client.mode(), ClientMode::HttpOnly);
        client.reset_mode();
        assert_eq!(client.mode(), ClientMode::WebsocketOnly);
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let client = client(ClientMode::HttpOnly, DemotionPolicy::Sticky);
        let (result, stats) = client.execute_traced(Request::call("base", "ping")).await;
        assert!(matches!(
            result,
            Err(LerpcError::TooManyAttempts { attempts: 3 })
        ));
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.fallbacks, 0);
        assert!(!stats.success);
        assert!(stats.last_error.is_some());
    }

    /// Serve `body` as a 200 reply to every HTTP request, counting requests.
    async fn garbage_http_server(body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    while read_http_request(&mut socket).await {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let response = format!(
                            "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        if socket.write_all(response.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        (addr.to_string(), served)
    }

    /// Consume one request (headers plus content-length body). False on EOF.
    async fn read_http_request(socket: &mut TcpStream) -> bool {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return false,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + length {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return false,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
        true
    }

    #[tokio::test]
    async fn test_undecodable_reply_is_not_retried() {
        let (addr, served) = garbage_http_server("not a result").await;
        let client = Client::new(
            ClientConfig::new(&addr, "")
                .with_mode(ClientMode::HttpOnly)
                .with_max_attempts(5),
        )
        .unwrap();

        let (result, stats) = client.execute_traced(Request::call("base", "ping")).await;
        assert!(matches!(result, Err(LerpcError::Json { .. })));
        assert_eq!(stats.attempts, 1);
        assert!(!stats.success);
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_balanced_falls_back_before_giving_up() {
        let (addr, _) = garbage_http_server("not a result").await;
        let client = Client::new(
            ClientConfig::new(&addr, "")
                .with_mode(ClientMode::Balanced)
                .with_demotion(DemotionPolicy::PerCall)
                .with_max_attempts(5),
        )
        .unwrap();

        // The unstarted pool fails the first attempt, then HTTP returns junk.
        let (result, stats) = client.execute_traced(Request::call("base", "ping")).await;
        assert!(matches!(result, Err(LerpcError::Json { .. })));
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.fallbacks, 1);
    }

    #[tokio::test]
    async fn test_sticky_demotion_persists() {
        let client = client(ClientMode::Balanced, DemotionPolicy::Sticky);
        let (_, stats) = client.execute_traced(Request::call("base", "ping")).await;
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(client.mode(), ClientMode::HttpOnly);

        client.reset_mode();
        assert_eq!(client.mode(), ClientMode::Balanced);
    }

    #[tokio::test]
    async fn test_per_call_demotion_does_not_persist() {
        let client = client(ClientMode::Balanced, DemotionPolicy::PerCall);
        let (_, stats) = client.execute_traced(Request::call("base", "ping")).await;
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(client.mode(), ClientMode::Balanced);
    }

    #[tokio::test]
    async fn test_token_injected() {
        let client = client(ClientMode::HttpOnly, DemotionPolicy::Sticky);
        let request = client.prepare(Request::call("base", "ping").with_token("other"));
        assert_eq!(request.token, "secret");

        let anonymous = Client::new(ClientConfig::new(DEAD_ADDRESS, "")).unwrap();
        let request = anonymous.prepare(Request::call("base", "ping").with_token("own"));
        assert_eq!(request.token, "own");
    }

    #[tokio::test]
    async fn test_execute_async_resolves() {
        let client = client(ClientMode::HttpOnly, DemotionPolicy::Sticky);
        let promise = client.execute_async(Request::call("base", "ping"));
        assert!(matches!(
            promise.wait().await,
            Err(LerpcError::PromiseFailed { .. })
        ));
    }
}
