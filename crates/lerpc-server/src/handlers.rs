//! Demo handlers registered by the `lerpc-server` binary.
//!
//! - `base/ping`: replies with the server time in milliseconds (`ts`).
//! - `download/file.prepare`: registers a file under `root` as a download
//!   entry and replies with its `key`. Params: `path` (relative to `root`),
//!   optional `content_type`, `limit`, `lifetime_ms`.

use lerpc_core::handler::AuthFn;
use lerpc_core::{DownloadEntry, FnHandler, HandlerRegistry, Request, RequestContext, RpcResult};
use rand::Rng;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Register the demo handlers, each gated by `auth`.
pub fn register(registry: &HandlerRegistry, auth: AuthFn, root: PathBuf) {
    registry.add(FnHandler::route("base", "ping", auth.clone(), |_, _| async {
        ping()
    }));

    let root = Arc::new(root);
    registry.add(FnHandler::route(
        "download",
        "file.prepare",
        auth,
        move |ctx, request| {
            let root = Arc::clone(&root);
            async move { prepare_file(&ctx, &request, &root) }
        },
    ));
}

fn ping() -> RpcResult {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default();
    RpcResult::success(Default::default()).set_data("ts", ts)
}

fn prepare_file(ctx: &RequestContext, request: &Request, root: &Path) -> RpcResult {
    let Some(relative) = request.param_str("path") else {
        return RpcResult::error("missing path");
    };
    let relative = Path::new(relative);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return RpcResult::error("path must stay inside the served root");
    }

    let path = root.join(relative);
    if !path.is_file() {
        return RpcResult::error("file not found");
    }

    let (default_lifetime, default_limit) = ctx.download_defaults();
    let lifetime = request
        .param_u64("lifetime_ms")
        .map(Duration::from_millis)
        .unwrap_or(default_lifetime);
    let limit = request
        .param_u64("limit")
        .and_then(|limit| u32::try_from(limit).ok())
        .unwrap_or(default_limit);
    let content_type = request
        .param_str("content_type")
        .unwrap_or("application/octet-stream");

    let key = format!("{:016x}", rand::rng().random::<u64>());
    debug!("Prepared download {} for {}", key, path.display());
    ctx.downloads().add(
        DownloadEntry::file(key.clone(), content_type, path)
            .with_lifetime(lifetime)
            .with_limit(limit),
    );

    RpcResult::success(Default::default()).set_data("key", key)
}
