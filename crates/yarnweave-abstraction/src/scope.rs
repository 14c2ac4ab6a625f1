//! Hierarchical cancellation scopes.
//!
//! A scope is a monotonic "abandon this work" signal. Cancelling a scope cancels
//! every scope created from it with [`CancellationScope::child`], never its parent.

use std::fmt;
use tokio_util::sync::CancellationToken;

/// A node in a tree of cancellation signals.
///
/// Cloning a scope yields another handle to the same node.
#[derive(Clone, Default)]
pub struct CancellationScope {
    token: CancellationToken,
}

impl fmt::Debug for CancellationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationScope").field("cancelled", &self.is_cancelled()).finish()
    }
}

impl CancellationScope {
    /// Creates a new root scope.
    #[must_use]
    pub fn new() -> Self {
        Self { token: CancellationToken::new() }
    }

    /// Creates a child scope that is cancelled whenever this scope is.
    ///
    /// A child created from an already-cancelled scope starts out cancelled.
    #[must_use]
    pub fn child(&self) -> Self {
        Self { token: self.token.child_token() }
    }

    /// Cancels this scope and all of its descendants. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once this scope (or any ancestor) has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Suspends until the scope is cancelled.
    ///
    /// Resolves immediately if the scope is already cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Returns the underlying token, for use with `tokio::select!` helpers.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// The pair of scopes attached to a single line presentation.
///
/// `hurry_up` is a child of `next_line`: requesting the next line also hurries
/// the current one, but hurrying never abandons it.
#[derive(Debug, Clone)]
pub struct LineScopes {
    next_line: CancellationScope,
    hurry_up: CancellationScope,
}

impl LineScopes {
    /// Creates a fresh pair with a new root `next_line` scope.
    #[must_use]
    pub fn new() -> Self {
        let next_line = CancellationScope::new();
        let hurry_up = next_line.child();
        Self { next_line, hurry_up }
    }

    /// Scope cancelled when the line must be abandoned entirely.
    #[must_use]
    pub fn next_line(&self) -> &CancellationScope {
        &self.next_line
    }

    /// Scope cancelled when the line should finish presenting quickly.
    #[must_use]
    pub fn hurry_up(&self) -> &CancellationScope {
        &self.hurry_up
    }

    /// Abandons the line. Also hurries it.
    pub fn request_next_line(&self) {
        self.next_line.cancel();
    }

    /// Asks views to speed up without abandoning the line.
    pub fn request_hurry_up(&self) {
        self.hurry_up.cancel();
    }
}

impl Default for LineScopes {
    fn default() -> Self {
        Self::new()
    }
}
