//! In-memory user directory.
//!
//! The directory owns the canonical user records; every accessor hands out
//! snapshots. Mutations are mutually exclusive with each other and with
//! reads, readers run concurrently with each other.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AuthError, UserError};
use crate::origin::OriginRule;

/// A known user: unique name, credential digest, allowed origins.
#[derive(Clone)]
pub struct User {
    username: String,
    secret_digest: [u8; 32],
    origins: HashSet<OriginRule>,
}

impl User {
    fn new(username: &str, secret: &str) -> Self {
        Self {
            username: username.to_string(),
            secret_digest: digest_secret(secret),
            origins: HashSet::new(),
        }
    }

    /// The unique name this user is keyed by.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Origin rules currently attached to this user.
    pub fn origins(&self) -> impl Iterator<Item = &OriginRule> {
        self.origins.iter()
    }

    /// Constant-time credential check against the stored digest.
    pub fn verify_secret(&self, secret: &str) -> bool {
        digest_secret(secret)[..].ct_eq(&self.secret_digest[..]).into()
    }

    /// True when the allow-any marker is present or any stored prefix
    /// contains `addr`.
    pub fn matches_origin(&self, addr: IpAddr) -> bool {
        self.origins.iter().any(|rule| rule.matches(addr))
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The digest is redacted down to a short fingerprint.
        f.debug_struct("User")
            .field("username", &self.username)
            .field("secret_digest", &hex::encode(&self.secret_digest[..4]))
            .field("origins", &self.origins)
            .finish()
    }
}

fn digest_secret(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// Extracts the host address from an origin string.
///
/// Tolerates a trailing port (`192.0.2.1:4444`, `[2001:db8::1]:4444`) as
/// well as bare addresses of either family. Returns `None` for anything
/// else, which origin matching treats as a denial.
pub fn origin_addr(origin: &str) -> Option<IpAddr> {
    if let Ok(addr) = origin.parse::<IpAddr>() {
        return Some(addr);
    }
    origin.parse::<SocketAddr>().ok().map(|sock| sock.ip())
}

/// Pluggable directory lookup used by every authentication binding.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Resolves a user by name, credential and origin address.
    ///
    /// # Errors
    ///
    /// Returns the failure kind for local diagnostics; callers at a
    /// transport boundary must collapse every kind to the same rejection.
    async fn find_user(&self, username: &str, secret: &str, origin: &str)
    -> Result<User, AuthError>;
}

/// Concurrent in-memory directory of known users.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl UserDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a user, starting with an empty origin set.
    ///
    /// Returns a snapshot of the stored record.
    pub async fn add(&self, username: &str, secret: &str) -> User {
        let user = User::new(username, secret);
        let mut users = self.users.write().await;
        users.insert(username.to_string(), user.clone());
        debug!(user = username, total = users.len(), "user added");
        user
    }

    /// Deletes a user, returning the prior record if one existed.
    pub async fn remove(&self, username: &str) -> Option<User> {
        let mut users = self.users.write().await;
        let removed = users.remove(username);
        if removed.is_some() {
            debug!(user = username, total = users.len(), "user removed");
        }
        removed
    }

    /// Snapshot of a single user.
    pub async fn get(&self, username: &str) -> Option<User> {
        self.users.read().await.get(username).cloned()
    }

    /// Snapshot of every user.
    pub async fn list(&self) -> Vec<User> {
        self.users.read().await.values().cloned().collect()
    }

    /// Attaches an origin rule to an existing user.
    ///
    /// # Errors
    ///
    /// Fails when the spec does not parse or the user is unknown.
    pub async fn add_origin(&self, username: &str, spec: &str) -> Result<(), UserError> {
        let rule = OriginRule::parse(spec)?;
        let mut users = self.users.write().await;
        let user = users
            .get_mut(username)
            .ok_or_else(|| UserError::UnknownUser(username.to_string()))?;
        user.origins.insert(rule);
        debug!(user = username, origin = spec, "origin rule added");
        Ok(())
    }

    /// Detaches an origin rule from an existing user.
    ///
    /// The spec goes through the same normalization as
    /// [`UserDirectory::add_origin`], so a bare address removes the
    /// host-prefix entry it created. Removing an entry that is not present
    /// is a no-op; removing the allow-any marker requires `spec == "*"`.
    ///
    /// # Errors
    ///
    /// Fails when the spec does not parse or the user is unknown.
    pub async fn remove_origin(&self, username: &str, spec: &str) -> Result<(), UserError> {
        let rule = OriginRule::parse(spec)?;
        let mut users = self.users.write().await;
        let user = users
            .get_mut(username)
            .ok_or_else(|| UserError::UnknownUser(username.to_string()))?;
        if user.origins.remove(&rule) {
            debug!(user = username, origin = spec, "origin rule removed");
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for UserDirectory {
    async fn find_user(
        &self,
        username: &str,
        secret: &str,
        origin: &str,
    ) -> Result<User, AuthError> {
        let Some(user) = self.get(username).await else {
            debug!(user = username, "user not found");
            return Err(AuthError::NotFound);
        };

        if !user.verify_secret(secret) {
            debug!(user = username, "credential mismatch");
            return Err(AuthError::BadCredential);
        }

        let Some(addr) = origin_addr(origin) else {
            debug!(user = username, origin, "origin address did not parse");
            return Err(AuthError::OriginDenied);
        };

        if !user.matches_origin(addr) {
            debug!(user = username, origin = %addr, "origin not allowed");
            return Err(AuthError::OriginDenied);
        }

        Ok(user)
    }
}
