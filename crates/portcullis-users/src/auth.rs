//! Bounded-deadline authentication over a pluggable user store.

use std::sync::Arc;
use std::time::Duration;

use portcullis_core::{CancelCause, CancelToken};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::directory::{User, UserStore};
use crate::error::AuthError;

/// Default deadline for one authentication attempt.
///
/// The in-memory directory answers in microseconds; the deadline chiefly
/// bounds externally pluggable [`UserStore`] implementations.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Bridges transport credential callbacks to the user store.
///
/// One instance is shared by every transport binding (the SSH password
/// callback and the HTTP basic-credential binding both call
/// [`Authenticator::authenticate`]); callers extract the username, secret
/// and origin address from their own transport envelope first.
pub struct Authenticator {
    store: Arc<dyn UserStore>,
    deadline: Duration,
}

impl Authenticator {
    /// Creates an authenticator with the default deadline.
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self::with_deadline(store, DEFAULT_AUTH_TIMEOUT)
    }

    /// Creates an authenticator with an explicit deadline.
    pub fn with_deadline(store: Arc<dyn UserStore>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    /// Runs one authentication attempt under the deadline.
    ///
    /// A child of `parent` scopes the attempt: parent cancellation
    /// (shutdown) ends the wait, and an elapsed deadline cancels the child
    /// with [`CancelCause::AuthTimeout`]. The child is released on return
    /// in every path.
    ///
    /// # Errors
    ///
    /// Returns the failure kind for local diagnostics only; transport
    /// bindings collapse every kind to the same rejection.
    pub async fn authenticate(
        &self,
        parent: &CancelToken,
        username: &str,
        secret: &str,
        origin: &str,
    ) -> Result<User, AuthError> {
        let guard = parent.child();

        tokio::select! {
            () = guard.cancelled() => {
                debug!(
                    user = username,
                    cause = ?guard.cause(),
                    "authentication abandoned by cancellation"
                );
                Err(AuthError::Timeout)
            }
            attempt = timeout(self.deadline, self.store.find_user(username, secret, origin)) => {
                match attempt {
                    Ok(verdict) => verdict,
                    Err(_) => {
                        guard.cancel(CancelCause::AuthTimeout);
                        warn!(
                            user = username,
                            deadline_secs = self.deadline.as_secs(),
                            "authentication attempt timed out"
                        );
                        Err(AuthError::Timeout)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::UserDirectory;
    use async_trait::async_trait;

    /// Store that never answers, standing in for a wedged remote backend.
    struct StalledStore;

    #[async_trait]
    impl UserStore for StalledStore {
        async fn find_user(
            &self,
            _username: &str,
            _secret: &str,
            _origin: &str,
        ) -> Result<User, AuthError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn authenticates_against_the_directory() {
        let directory = Arc::new(UserDirectory::new());
        directory.add("alice", "s3cret").await;
        directory.add_origin("alice", "10.0.0.0/24").await.unwrap();

        let authenticator = Authenticator::new(directory);
        let root = CancelToken::new();

        let user = authenticator
            .authenticate(&root, "alice", "s3cret", "10.0.0.5:4444")
            .await
            .unwrap();
        assert_eq!(user.username(), "alice");
    }

    #[tokio::test]
    async fn stalled_store_times_out_instead_of_hanging() {
        let authenticator =
            Authenticator::with_deadline(Arc::new(StalledStore), Duration::from_millis(20));
        let root = CancelToken::new();

        let verdict = authenticator
            .authenticate(&root, "alice", "s3cret", "10.0.0.5")
            .await;
        assert_eq!(verdict.unwrap_err(), AuthError::Timeout);
    }

    #[tokio::test]
    async fn parent_cancellation_ends_the_wait() {
        let authenticator =
            Authenticator::with_deadline(Arc::new(StalledStore), Duration::from_secs(60));
        let root = CancelToken::new();

        let attempt = authenticator.authenticate(&root, "alice", "s3cret", "10.0.0.5");
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            root.cancel(CancelCause::Shutdown);
        };

        let (verdict, ()) = tokio::join!(attempt, cancel);
        assert_eq!(verdict.unwrap_err(), AuthError::Timeout);
    }
}
