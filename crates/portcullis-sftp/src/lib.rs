//! # Portcullis SFTP
//!
//! A small embeddable secure file-access endpoint over the SSH protocol
//! (RFC 4251-4254): password logins are checked against a user directory
//! with per-user network-origin rules, every live connection is tracked for
//! coordinated shutdown, and authenticated session channels are handed to
//! an SFTP subsystem (draft-ietf-secsh-filexfer-02).
//!
//! ## Features
//!
//! - Async/await with Tokio, one task per connection
//! - Bounded-deadline password authentication with origin enforcement
//! - Connection registry with concurrent drain on shutdown
//! - Channel/subsystem negotiation with a replaceable subsystem service
//! - Root-jailed local filesystem for session channels

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fs;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod subsystem;

pub use config::{Config, LogFormat, LoggingConfig, UserConfig};
pub use dispatcher::SessionDispatcher;
pub use error::{Error, Result};
pub use fs::LocalFs;
pub use registry::{ConnectionControl, ConnectionId, ConnectionRegistry};
pub use server::Server;
pub use subsystem::{BoxedByteStream, SftpSubsystem, SubsystemService};
