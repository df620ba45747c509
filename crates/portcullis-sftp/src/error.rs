//! Error types for the server.
//!
//! Authentication failures carry their kind for local diagnostics but are
//! collapsed to a uniform "access denied" before anything reaches a remote
//! peer; see [`Error::client_message`].

use portcullis_users::AuthError;
use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Server error types.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH transport error
    #[error("SSH error: {0}")]
    Ssh(String),

    /// Authentication failed; the kind stays local
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Violation of the subsystem wire protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// File or directory does not exist
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Access control violation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Path validation failure (traversal, NUL bytes, empty)
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Invalid or closed session handle
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// Unsupported operation or feature
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection lifecycle error
    #[error("connection error: {0}")]
    Connection(String),
}

impl Error {
    /// Maps this error to an SFTP STATUS code.
    pub fn to_status_code(&self) -> u32 {
        use crate::protocol::Status;

        match self {
            Self::FileNotFound(_) => Status::NoSuchFile as u32,
            Self::PermissionDenied(_) | Self::Auth(_) => Status::PermissionDenied as u32,
            Self::InvalidPath(_) | Self::InvalidHandle(_) | Self::Protocol(_) => {
                Status::BadMessage as u32
            }
            Self::NotSupported(_) => Status::OpUnsupported as u32,
            _ => Status::Failure as u32,
        }
    }

    /// Message safe to put on the wire.
    ///
    /// Auth failure kinds, filesystem paths and configuration details stay
    /// out of it.
    pub fn client_message(&self) -> String {
        match self {
            Self::Auth(_) => "access denied".to_string(),
            Self::PermissionDenied(_) => "permission denied".to_string(),
            Self::InvalidPath(_) => "invalid path".to_string(),
            Self::FileNotFound(_) => "no such file".to_string(),
            Self::Config(_) => "server configuration error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<russh::Error> for Error {
    fn from(err: russh::Error) -> Self {
        Self::Ssh(err.to_string())
    }
}

impl From<russh_keys::Error> for Error {
    fn from(err: russh_keys::Error) -> Self {
        Self::Ssh(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Status;

    #[test]
    fn status_codes_follow_the_wire_taxonomy() {
        assert_eq!(
            Error::FileNotFound("x".into()).to_status_code(),
            Status::NoSuchFile as u32
        );
        assert_eq!(
            Error::PermissionDenied("x".into()).to_status_code(),
            Status::PermissionDenied as u32
        );
        assert_eq!(
            Error::NotSupported("x".into()).to_status_code(),
            Status::OpUnsupported as u32
        );
        assert_eq!(
            Error::InvalidHandle("x".into()).to_status_code(),
            Status::BadMessage as u32
        );
    }

    #[test]
    fn every_auth_kind_collapses_on_the_wire() {
        for kind in [
            AuthError::NotFound,
            AuthError::BadCredential,
            AuthError::OriginDenied,
            AuthError::Timeout,
        ] {
            assert_eq!(Error::Auth(kind).client_message(), "access denied");
        }
    }

    #[test]
    fn client_messages_hide_paths_and_config() {
        let err = Error::PermissionDenied("/etc/shadow".into());
        assert_eq!(err.client_message(), "permission denied");

        let err = Error::Config("missing host key at /secure/path".into());
        assert_eq!(err.client_message(), "server configuration error");
    }
}
