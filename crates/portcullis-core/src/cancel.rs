//! Cancellation tokens with a recorded cause.
//!
//! Every task that must observe shutdown receives one of these explicitly;
//! the cause travels with the signal instead of living in ambient state, so
//! diagnostics can say *why* a wait ended, not just that it did.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// Reason recorded when a cancellation signal fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The server is shutting down and draining live connections.
    Shutdown,
    /// The authentication deadline elapsed.
    AuthTimeout,
    /// The remote peer went away.
    Disconnected,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Shutdown => "server shutting down",
            Self::AuthTimeout => "authentication timeout",
            Self::Disconnected => "peer disconnected",
        };
        f.write_str(reason)
    }
}

/// A cancellation token that remembers why it was cancelled.
///
/// Child tokens observe the parent's cancellation. [`CancelToken::cause`]
/// reports the nearest recorded reason: a child that was never cancelled
/// directly falls back to its parent's cause. Cancelling a child never
/// disturbs the parent.
#[derive(Debug, Clone)]
pub struct CancelToken {
    token: CancellationToken,
    cause: Arc<OnceLock<CancelCause>>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    /// Creates a root token.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            cause: Arc::new(OnceLock::new()),
            parent: None,
        }
    }

    /// Derives a child token cancelled whenever this token is cancelled.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            cause: Arc::new(OnceLock::new()),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Cancels this token (and its children), recording `cause`.
    ///
    /// The first recorded cause wins; later calls still cancel but do not
    /// overwrite it.
    pub fn cancel(&self, cause: CancelCause) {
        let _ = self.cause.set(cause);
        self.token.cancel();
    }

    /// Whether the token has been cancelled, directly or via a parent.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the token is cancelled, directly or via a parent.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// The recorded cause, walking up to the parent when this token never
    /// recorded one of its own.
    pub fn cause(&self) -> Option<CancelCause> {
        if let Some(cause) = self.cause.get() {
            return Some(*cause);
        }
        self.parent.as_ref().and_then(|parent| parent.cause())
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_records_cause() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.cause(), None);

        token.cancel(CancelCause::Shutdown);
        assert!(token.is_cancelled());
        assert_eq!(token.cause(), Some(CancelCause::Shutdown));
        token.cancelled().await;
    }

    #[tokio::test]
    async fn child_observes_parent_and_inherits_cause() {
        let parent = CancelToken::new();
        let child = parent.child();

        parent.cancel(CancelCause::Shutdown);
        child.cancelled().await;
        assert!(child.is_cancelled());
        assert_eq!(child.cause(), Some(CancelCause::Shutdown));
    }

    #[test]
    fn child_cancel_leaves_parent_running() {
        let parent = CancelToken::new();
        let child = parent.child();

        child.cancel(CancelCause::AuthTimeout);
        assert!(child.is_cancelled());
        assert_eq!(child.cause(), Some(CancelCause::AuthTimeout));
        assert!(!parent.is_cancelled());
        assert_eq!(parent.cause(), None);
    }

    #[test]
    fn first_recorded_cause_wins() {
        let token = CancelToken::new();
        token.cancel(CancelCause::Disconnected);
        token.cancel(CancelCause::Shutdown);
        assert_eq!(token.cause(), Some(CancelCause::Disconnected));
    }

    #[test]
    fn own_cause_shadows_parent_cause() {
        let parent = CancelToken::new();
        let child = parent.child();

        child.cancel(CancelCause::AuthTimeout);
        parent.cancel(CancelCause::Shutdown);
        assert_eq!(child.cause(), Some(CancelCause::AuthTimeout));
        assert_eq!(parent.cause(), Some(CancelCause::Shutdown));
    }
}
