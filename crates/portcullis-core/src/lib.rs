//! # Portcullis Core
//!
//! Shared primitives for the portcullis server crates, chiefly the
//! cause-carrying cancellation token that coordinates connection teardown
//! across the transport, authentication and subsystem layers.

pub mod cancel;

pub use cancel::{CancelCause, CancelToken};
