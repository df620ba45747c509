//! Error types for directory lookups and origin management.

use thiserror::Error;

/// Failure kinds for an authentication attempt.
///
/// The kinds are distinguishable here for diagnostics, but every one of
/// them must surface to a remote peer as the same generic rejection; none
/// of these messages may cross the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No user with the presented name exists.
    #[error("user not found")]
    NotFound,
    /// The presented credential does not match the stored one.
    #[error("credential mismatch")]
    BadCredential,
    /// The credential matched but the connection origin is not allowed.
    #[error("origin not allowed")]
    OriginDenied,
    /// The directory lookup outlived its deadline or was cancelled.
    #[error("authentication timed out")]
    Timeout,
}

/// Malformed origin specification handed to a management operation.
///
/// Reported to the caller of that operation, never to a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The spec is not a well-formed bare address.
    #[error("invalid origin address {0:?}")]
    Address(String),
    /// The spec is not a well-formed address prefix.
    #[error("invalid origin prefix {0:?}")]
    Prefix(String),
}

/// Errors from the user-management operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserError {
    /// The named user does not exist in the directory.
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    /// The origin spec did not parse.
    #[error(transparent)]
    Parse(#[from] ParseError),
}
