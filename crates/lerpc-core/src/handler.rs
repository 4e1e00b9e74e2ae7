//! Request handlers and their ordered registry.
//!
//! A handler is a `{match, auth, execute}` triple. The registry scans handlers
//! in registration order and the first whose match predicate accepts the
//! `(namespace, method)` pair wins, so overlapping matchers must be
//! registered most-specific first.

use crate::context::RequestContext;
use crate::lock_unpoisoned;
use crate::proto::{Request, RpcResult};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Capability set every handler provides.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Whether this handler serves `namespace::method`.
    fn matches(&self, namespace: &str, method: &str) -> bool;

    /// Whether `token` may invoke this handler. Defaults to always.
    fn authorize(&self, _ctx: &RequestContext, _token: &str) -> bool {
        true
    }

    /// Run the request and produce its result.
    async fn execute(&self, ctx: &RequestContext, request: Request) -> RpcResult;
}

pub type MatchFn = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;
pub type AuthFn = Arc<dyn Fn(&RequestContext, &str) -> bool + Send + Sync>;
pub type ExecuteFn =
    Arc<dyn Fn(RequestContext, Request) -> BoxFuture<'static, RpcResult> + Send + Sync>;

/// Match exactly `namespace::method`.
pub fn match_route(namespace: impl Into<String>, method: impl Into<String>) -> MatchFn {
    let namespace = namespace.into();
    let method = method.into();
    Arc::new(move |n: &str, m: &str| n == namespace && m == method)
}

/// Match `method` in any namespace.
pub fn match_method(method: impl Into<String>) -> MatchFn {
    let method = method.into();
    Arc::new(move |_: &str, m: &str| m == method)
}

/// Accept every token.
pub fn auth_none() -> AuthFn {
    Arc::new(|_: &RequestContext, _: &str| true)
}

/// Accept only `token`.
pub fn auth_token(token: impl Into<String>) -> AuthFn {
    let token = token.into();
    Arc::new(move |_: &RequestContext, t: &str| t == token)
}

/// Box an async closure into an [`ExecuteFn`].
pub fn execute_fn<F, Fut>(f: F) -> ExecuteFn
where
    F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult> + Send + 'static,
{
    Arc::new(
        move |ctx: RequestContext, request: Request| -> BoxFuture<'static, RpcResult> {
            Box::pin(f(ctx, request))
        },
    )
}

/// Handler assembled from closures.
///
/// An absent match predicate never matches; an absent auth predicate always
/// authorizes.
pub struct FnHandler {
    match_fn: Option<MatchFn>,
    auth_fn: Option<AuthFn>,
    execute_fn: ExecuteFn,
}

impl FnHandler {
    pub fn new(match_fn: Option<MatchFn>, auth_fn: Option<AuthFn>, execute_fn: ExecuteFn) -> Self {
        Self {
            match_fn,
            auth_fn,
            execute_fn,
        }
    }

    /// Handler bound to `namespace::method` with a custom auth predicate.
    pub fn route<F, Fut>(
        namespace: impl Into<String>,
        method: impl Into<String>,
        auth: AuthFn,
        execute: F,
    ) -> Self
    where
        F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult> + Send + 'static,
    {
        Self::new(
            Some(match_route(namespace, method)),
            Some(auth),
            execute_fn(execute),
        )
    }

    /// Handler bound to `namespace::method` that requires a static token.
    pub fn with_token<F, Fut>(
        namespace: impl Into<String>,
        method: impl Into<String>,
        token: impl Into<String>,
        execute: F,
    ) -> Self
    where
        F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult> + Send + 'static,
    {
        Self::route(namespace, method, auth_token(token), execute)
    }

    /// Handler bound to `namespace::method` with no auth.
    pub fn open<F, Fut>(namespace: impl Into<String>, method: impl Into<String>, execute: F) -> Self
    where
        F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult> + Send + 'static,
    {
        Self::route(namespace, method, auth_none(), execute)
    }
}

#[async_trait::async_trait]
impl Handler for FnHandler {
    fn matches(&self, namespace: &str, method: &str) -> bool {
        match &self.match_fn {
            Some(f) => f(namespace, method),
            None => false,
        }
    }

    fn authorize(&self, ctx: &RequestContext, token: &str) -> bool {
        match &self.auth_fn {
            Some(f) => f(ctx, token),
            None => true,
        }
    }

    async fn execute(&self, ctx: &RequestContext, request: Request) -> RpcResult {
        (self.execute_fn)(ctx.clone(), request).await
    }
}

/// Append-only, ordered handler list.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<Vec<Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler after all previously registered ones.
    pub fn add(&self, handler: impl Handler) {
        self.add_shared(Arc::new(handler));
    }

    pub fn add_shared(&self, handler: Arc<dyn Handler>) {
        lock_unpoisoned(&self.handlers).push(handler);
    }

    /// First handler, in registration order, that matches.
    pub fn lookup(&self, namespace: &str, method: &str) -> Option<Arc<dyn Handler>> {
        lock_unpoisoned(&self.handlers)
            .iter()
            .find(|handler| handler.matches(namespace, method))
            .cloned()
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.handlers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}
