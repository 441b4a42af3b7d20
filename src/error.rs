//! Error types for the lease DNS responder.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants. Malformed lease text and DNS
//! lookup misses are not errors; they are handled where they occur.

/// Errors that can occur while running the responder.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system, process or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config file, lease listing).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// DNS message could not be decoded or encoded.
    #[error("DNS error: {0}")]
    Dns(#[from] hickory_proto::error::ProtoError),

    /// Invalid configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when the DNS port is already in use or requires
    /// elevated privileges.
    #[error("Socket error: {0}")]
    Socket(String),

    /// The lease source reached end of stream.
    ///
    /// A followed lease file never ends, so this means the `tail` process
    /// exited or the follower gave up.
    #[error("Lease source closed")]
    SourceClosed,
}

/// A specialized Result type for responder operations.
pub type Result<T> = std::result::Result<T, Error>;
