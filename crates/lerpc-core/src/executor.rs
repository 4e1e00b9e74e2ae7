//! Bounded request queue and its tick-driven consumer.
//!
//! Transports push decoded requests with [`Executor::push_request`] and await
//! the returned promise. A background loop pops at most one entry per tick, in
//! FIFO order, and runs it on its own task, so handlers execute concurrently
//! while dequeue order stays fixed. A second loop sweeps expired downloads.

use crate::cancel::CancellationToken;
use crate::config::ExecutorConfig;
use crate::context::{OutboundSender, RequestContext, TransportKind};
use crate::download::DownloadRegistry;
use crate::handler::{Handler, HandlerRegistry};
use crate::promise::Promise;
use crate::proto::{Request, RpcResult, ERROR_AUTH_FAILED, ERROR_HANDLER_NOT_FOUND};
use crate::{lock_unpoisoned, LerpcError, Result};
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// A queued request and the promise its result resolves.
struct QueueEntry {
    context: RequestContext,
    promise: Promise<RpcResult>,
}

/// Request queue, handler registry and download registry.
pub struct Executor {
    config: ExecutorConfig,
    queue: Mutex<VecDeque<QueueEntry>>,
    handlers: Arc<HandlerRegistry>,
    downloads: Arc<DownloadRegistry>,
}

impl Executor {
    pub fn new(
        config: ExecutorConfig,
        handlers: Arc<HandlerRegistry>,
        downloads: Arc<DownloadRegistry>,
    ) -> Self {
        Self {
            config,
            queue: Mutex::new(VecDeque::new()),
            handlers,
            downloads,
        }
    }

    /// Executor with an empty handler registry and default download settings.
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self::new(
            config,
            Arc::new(HandlerRegistry::new()),
            Arc::new(DownloadRegistry::default()),
        )
    }

    /// Register a handler after all existing ones.
    pub fn add_handler(&self, handler: impl Handler) {
        self.handlers.add(handler);
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn downloads(&self) -> &Arc<DownloadRegistry> {
        &self.downloads
    }

    pub fn capacity(&self) -> usize {
        self.config.queue_capacity
    }

    pub fn queue_len(&self) -> usize {
        lock_unpoisoned(&self.queue).len()
    }

    /// Queue a request for execution.
    ///
    /// Fails with [`LerpcError::QueueFull`] once `queue_capacity` entries are
    /// waiting; the request is not queued in that case.
    pub fn push_request(
        &self,
        transport: TransportKind,
        outbound: Option<OutboundSender>,
        request: Request,
    ) -> Result<Promise<RpcResult>> {
        let context = RequestContext::new(transport, outbound, request, self.downloads.clone());
        let promise = Promise::new();

        let mut queue = lock_unpoisoned(&self.queue);
        if queue.len() >= self.config.queue_capacity {
            warn!(
                "Rejecting {} request: queue full ({})",
                context.request().route(),
                self.config.queue_capacity
            );
            return Err(LerpcError::QueueFull {
                capacity: self.config.queue_capacity,
            });
        }
        queue.push_back(QueueEntry {
            context,
            promise: promise.clone(),
        });
        Ok(promise)
    }

    fn pop(&self) -> Option<QueueEntry> {
        lock_unpoisoned(&self.queue).pop_front()
    }

    /// Pop the oldest entry and run it on a new task.
    ///
    /// Returns `None` when the queue is empty.
    pub fn execute_one(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let entry = self.pop()?;
        let executor = Arc::clone(self);
        Some(tokio::spawn(async move {
            match executor.execute_request(&entry.context).await {
                Ok(result) => entry.promise.complete(result),
                Err(e) => entry.promise.fail(e.to_string()),
            };
        }))
    }

    /// Resolve the handler for `ctx`'s request, check auth, and run it.
    ///
    /// Unknown routes and rejected tokens come back as error results. Every
    /// result carries the request's key. Handler panics and timeouts are the
    /// only `Err` outcomes.
    pub async fn execute_request(&self, ctx: &RequestContext) -> Result<RpcResult> {
        let request = ctx.request();
        let key = request.key.clone();

        let Some(handler) = self.handlers.lookup(&request.namespace, &request.method) else {
            debug!("No handler for {}", request.route());
            return Ok(RpcResult::error(ERROR_HANDLER_NOT_FOUND).with_key(key));
        };

        if !handler.authorize(ctx, &request.token) {
            debug!("Auth rejected for {}", request.route());
            return Ok(RpcResult::error(ERROR_AUTH_FAILED).with_key(key));
        }

        let run = AssertUnwindSafe(handler.execute(ctx, request.clone())).catch_unwind();
        let outcome = match self.config.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Handler for {} timed out after {:?}", request.route(), limit);
                    return Err(LerpcError::Other("handler timed out".to_string()));
                }
            },
            None => run.await,
        };

        match outcome {
            Ok(result) => Ok(result.with_key(key)),
            Err(_) => {
                error!("Handler for {} panicked", request.route());
                Err(LerpcError::Other("handler panicked".to_string()))
            }
        }
    }

    /// Spawn the consumer and sweep loops.
    pub fn start(self: &Arc<Self>) -> ExecutorHandle {
        let shutdown = CancellationToken::new();

        let tick_period = self.config.effective_tick_interval();
        if tick_period != self.config.tick_interval {
            warn!(
                "Tick interval {:?} is below the timer resolution, running at {:?}",
                self.config.tick_interval, tick_period
            );
        }
        let consumer = {
            let executor = Arc::clone(self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(tick_period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            executor.execute_one();
                        }
                    }
                }
                debug!("Executor consumer loop stopped");
            })
        };

        let sweep_period = self.config.effective_sweep_interval();
        let sweeper = {
            let downloads = Arc::clone(&self.downloads);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + sweep_period, sweep_period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            downloads.sweep().await;
                        }
                    }
                }
                debug!("Download sweep loop stopped");
            })
        };

        info!(
            "Executor started (capacity {}, tick {:?})",
            self.config.queue_capacity, tick_period
        );

        ExecutorHandle {
            shutdown,
            tasks: vec![consumer, sweeper],
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("queued", &self.queue_len())
            .field("handlers", &self.handlers)
            .finish()
    }
}

/// Handle to the executor's background loops.
///
/// Dropping the handle aborts the loops; [`shutdown`](Self::shutdown) stops
/// them cleanly. Entries still queued are left unresolved.
pub struct ExecutorHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ExecutorHandle {
    /// Stop the loops and wait for them to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!("Executor loop ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled() && self.tasks.iter().any(|task| !task.is_finished())
    }
}

impl Drop for ExecutorHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{auth_token, execute_fn, match_route, FnHandler};
    use crate::proto::ResultCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn executor(config: ExecutorConfig) -> Arc<Executor> {
        Arc::new(Executor::with_config(config))
    }

    fn ping(executor: &Executor) {
        executor.add_handler(FnHandler::open("base", "ping", |_, _| async {
            RpcResult::success(Default::default()).set_data("pong", true)
        }));
    }

    async fn run_one(executor: &Arc<Executor>) {
        executor.execute_one().unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_fifo_dequeue_order() {
        let executor = executor(ExecutorConfig::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();
        executor.add_handler(FnHandler::open("base", "record", move |_, request| {
            let seen = seen.clone();
            async move {
                let tag = request.param_str("tag").unwrap_or_default().to_string();
                seen.lock().unwrap().push(tag);
                RpcResult::success(Default::default())
            }
        }));

        let mut promises = Vec::new();
        for tag in ["A", "B", "C"] {
            let request = Request::call("base", "record").set_param("tag", tag);
            promises.push(executor.push_request(TransportKind::Http, None, request).unwrap());
        }
        assert_eq!(executor.queue_len(), 3);

        for _ in 0..3 {
            run_one(&executor).await;
        }
        assert!(executor.execute_one().is_none());
        assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
        for promise in promises {
            assert!(promise.is_resolved());
        }
    }

    #[tokio::test]
    async fn test_queue_full_rejects_push() {
        let executor = executor(ExecutorConfig::default().with_queue_capacity(1));
        ping(&executor);

        let first = executor
            .push_request(TransportKind::Http, None, Request::call("base", "ping"))
            .unwrap();
        let second = executor.push_request(TransportKind::Http, None, Request::call("base", "ping"));
        assert!(matches!(second, Err(LerpcError::QueueFull { capacity: 1 })));
        assert_eq!(executor.queue_len(), 1);

        run_one(&executor).await;
        assert_eq!(first.wait().await.unwrap().code, ResultCode::Success);

        // Space freed by the pop is usable again.
        assert!(executor
            .push_request(TransportKind::Http, None, Request::call("base", "ping"))
            .is_ok());
    }

    #[tokio::test]
    async fn test_auth_failure_skips_execute() {
        let executor = executor(ExecutorConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        executor.add_handler(FnHandler::new(
            Some(match_route("base", "guarded")),
            Some(auth_token("secret")),
            execute_fn(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { RpcResult::success(Default::default()) }
            }),
        ));

        let request = Request::call("base", "guarded")
            .with_token("wrong")
            .with_key("k1");
        let promise = executor.push_request(TransportKind::Http, None, request).unwrap();
        run_one(&executor).await;

        let result = promise.wait().await.unwrap();
        assert_eq!(result.code, ResultCode::Error);
        assert_eq!(result.message.as_deref(), Some(ERROR_AUTH_FAILED));
        assert_eq!(result.key.as_deref(), Some("k1"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let request = Request::call("base", "guarded").with_token("secret");
        let promise = executor.push_request(TransportKind::Http, None, request).unwrap();
        run_one(&executor).await;
        assert_eq!(promise.wait().await.unwrap().code, ResultCode::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_route_reports_not_found() {
        let executor = executor(ExecutorConfig::default());
        ping(&executor);

        let request = Request::call("base", "missing").with_key("k2");
        let promise = executor.push_request(TransportKind::Http, None, request).unwrap();
        run_one(&executor).await;

        let result = promise.wait().await.unwrap();
        assert!(result.is_error());
        assert_eq!(result.message.as_deref(), Some(ERROR_HANDLER_NOT_FOUND));
        assert_eq!(result.key.as_deref(), Some("k2"));
    }

    #[tokio::test]
    async fn test_key_overrides_handler_key() {
        let executor = executor(ExecutorConfig::default());
        executor.add_handler(FnHandler::open("base", "rekey", |_, _| async {
            RpcResult::success(Default::default()).with_key(Some("handler".to_string()))
        }));

        let request = Request::call("base", "rekey").with_key("caller");
        let promise = executor.push_request(TransportKind::Http, None, request).unwrap();
        run_one(&executor).await;
        assert_eq!(promise.wait().await.unwrap().key.as_deref(), Some("caller"));
    }

    #[tokio::test]
    async fn test_handler_timeout_fails_promise() {
        let executor = executor(
            ExecutorConfig::default().with_handler_timeout(Some(Duration::from_millis(20))),
        );
        executor.add_handler(FnHandler::open("base", "slow", |_, _| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            RpcResult::new()
        }));

        let promise = executor
            .push_request(TransportKind::Http, None, Request::call("base", "slow"))
            .unwrap();
        run_one(&executor).await;
        match promise.wait().await {
            Err(LerpcError::PromiseFailed { message }) => assert_eq!(message, "handler timed out"),
            other => panic!("Expected timeout failure, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_panic_fails_promise() {
        let executor = executor(ExecutorConfig::default());
        executor.add_handler(FnHandler::open("base", "boom", |_, request| async move {
            if request.method == "boom" {
                panic!("boom");
            }
            RpcResult::new()
        }));

        let promise = executor
            .push_request(TransportKind::Http, None, Request::call("base", "boom"))
            .unwrap();
        run_one(&executor).await;
        match promise.wait().await {
            Err(LerpcError::PromiseFailed { message }) => assert_eq!(message, "handler panicked"),
            other => panic!("Expected panic failure, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_sees_context() {
        let executor = executor(ExecutorConfig::default());
        executor.add_handler(FnHandler::open("base", "ctx", |ctx, _| async move {
            RpcResult::success(Default::default())
                .set_data("duplex", ctx.transport() == TransportKind::Websocket)
                .set_data("has_outbound", ctx.outbound().is_some())
                .set_data("method", ctx.request().method.clone())
        }));

        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let promise = executor
            .push_request(TransportKind::Websocket, Some(tx), Request::call("base", "ctx"))
            .unwrap();
        run_one(&executor).await;

        let result = promise.wait().await.unwrap();
        assert_eq!(result.data_bool("duplex"), Some(true));
        assert_eq!(result.data_bool("has_outbound"), Some(true));
        assert_eq!(result.data_str("method"), Some("ctx"));
    }

    #[tokio::test]
    async fn test_started_loop_drains_queue() {
        let executor = executor(ExecutorConfig::default());
        ping(&executor);
        let handle = executor.start();
        assert!(handle.is_running());

        let mut promises = Vec::new();
        for i in 0..5 {
            let request = Request::call("base", "ping").with_key(format!("k{}", i));
            promises.push(executor.push_request(TransportKind::Http, None, request).unwrap());
        }

        for (i, promise) in promises.into_iter().enumerate() {
            let result = tokio::time::timeout(Duration::from_secs(2), promise.wait())
                .await
                .expect("promise should resolve")
                .unwrap();
            assert_eq!(result.key, Some(format!("k{}", i)));
            assert_eq!(result.data_bool("pong"), Some(true));
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_loop_removes_expired_downloads() {
        let executor = executor(
            ExecutorConfig::default().with_sweep_interval(Duration::from_millis(10)),
        );
        executor.downloads().add(
            crate::download::DownloadEntry::bytes("k", "a/b", "x").with_lifetime(Duration::ZERO),
        );
        let handle = executor.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(executor.downloads().is_empty());
        handle.shutdown().await;
    }
}
