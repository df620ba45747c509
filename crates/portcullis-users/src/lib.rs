//! # Portcullis Users
//!
//! The user directory behind the portcullis authentication gate: known
//! users, their credentials, and the network origins each user may connect
//! from.
//!
//! ## Features
//!
//! - Concurrent in-memory directory with exclusive-mutation / shared-read
//!   locking
//! - Origin rules as CIDR prefixes or an explicit allow-any marker
//! - Constant-time credential verification over SHA-256 digests
//! - A bounded-deadline [`Authenticator`] shared by every transport binding

pub mod auth;
pub mod directory;
pub mod error;
pub mod origin;

pub use auth::{Authenticator, DEFAULT_AUTH_TIMEOUT};
pub use directory::{User, UserDirectory, UserStore, origin_addr};
pub use error::{AuthError, ParseError, UserError};
pub use origin::OriginRule;
