//! Single-assignment asynchronous result cell.
//!
//! A [`Promise`] is resolved exactly once, by whichever queue entry (or
//! client call) created it, and can then be awaited by any number of
//! waiters. Later resolutions are ignored and reported back to the caller.

use crate::{LerpcError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

#[derive(Debug, Clone)]
enum Outcome<T> {
    Pending,
    Complete(T),
    Failed(String),
}

/// Cloneable handle to a single-assignment result.
#[derive(Debug, Clone)]
pub struct Promise<T> {
    state: Arc<watch::Sender<Outcome<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// Create an unresolved promise.
    pub fn new() -> Self {
        let (state, _) = watch::channel(Outcome::Pending);
        Self {
            state: Arc::new(state),
        }
    }

    /// Run `future` on a new task and resolve the promise with its outcome.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let promise = Self::new();
        let resolver = promise.clone();
        tokio::spawn(async move {
            match future.await {
                Ok(value) => resolver.complete(value),
                Err(e) => resolver.fail(e.to_string()),
            };
        });
        promise
    }

    /// Resolve with a value.
    ///
    /// Returns `false` and leaves the promise untouched if it was already
    /// resolved.
    pub fn complete(&self, value: T) -> bool {
        self.resolve(Outcome::Complete(value))
    }

    /// Resolve with a failure message.
    ///
    /// Returns `false` and leaves the promise untouched if it was already
    /// resolved.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.resolve(Outcome::Failed(message.into()))
    }

    fn resolve(&self, outcome: Outcome<T>) -> bool {
        let mut outcome = Some(outcome);
        let resolved = self.state.send_if_modified(|current| {
            if !matches!(current, Outcome::Pending) {
                return false;
            }
            if let Some(next) = outcome.take() {
                *current = next;
            }
            true
        });
        if !resolved {
            warn!("Ignoring resolution of an already resolved promise");
        }
        resolved
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(*self.state.borrow(), Outcome::Pending)
    }

    /// Wait for resolution and return the fixed value.
    ///
    /// A failed promise yields [`LerpcError::PromiseFailed`].
    pub async fn wait(&self) -> Result<T> {
        let mut rx = self.state.subscribe();
        let outcome = rx
            .wait_for(|outcome| !matches!(outcome, Outcome::Pending))
            .await
            .map_err(|_| LerpcError::PromiseFailed {
                message: "promise dropped before resolution".to_string(),
            })?
            .clone();

        match outcome {
            Outcome::Complete(value) => Ok(value),
            Outcome::Failed(message) => Err(LerpcError::PromiseFailed { message }),
            Outcome::Pending => Err(LerpcError::PromiseFailed {
                message: "promise observed while pending".to_string(),
            }),
        }
    }
}
