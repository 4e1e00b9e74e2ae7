//! Cancellation scope shared by cooperating tasks.
//!
//! A WebSocket connection owns one token: its reader loop, writer loop and
//! every per-message dispatch task hold clones of it. Cancelling any clone
//! tears down the whole scope. The executor's background loops use the same
//! token type for shutdown.

use std::sync::Arc;
use tokio::sync::watch;

/// A cancellation token for cooperative cancellation of async operations.
///
/// Clones share state: `cancel()` on any clone is observed by all of them,
/// and calling it more than once has no further effect.
///
/// # Example
///
/// ```
/// use lerpc_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let scope = token.clone();
///
/// scope.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.state.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait until cancellation is requested.
    ///
    /// Returns immediately if the token is already cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
