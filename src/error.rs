//! Crate error types
//!
//! Protocol-level anomalies (malformed frames, unknown targets,
//! unauthorized senders) are policy, not errors: they are dropped and at
//! most logged. This enum covers the faults the server itself can hit.

/// Result alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the server
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration (e.g. an unparsable `PORT`)
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failed to bind the listen address
    #[error("bind error: {0}")]
    Bind(#[source] std::io::Error),

    /// The server encountered a fatal error while serving
    #[error("serve error: {0}")]
    Serve(#[source] std::io::Error),
}
