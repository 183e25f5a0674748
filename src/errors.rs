//! Error taxonomy for the bet submission and winner polling phases.
//!
//! Every phase surfaces exactly one of these as its terminal outcome. Only the
//! "not ready" readiness code is retried, and that is a state rather than an
//! error, so nothing here is ever retried internally.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;

/// Application-level protocol breaches reported by the server.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Violation {
    /// The batch acknowledgment line was not `OK\n`; holds the line verbatim.
    #[error("received response from server: {0:?}")]
    UnexpectedAck(String),
    /// The connection ended before the readiness byte arrived.
    #[error("connection closed before the readiness code was sent")]
    MissingReadiness,
}

/// Errors that terminate a client phase.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connect, read, or write failure on the byte stream (including timeouts).
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// An encoded batch exceeded the wire payload cap.
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Encoded payload size in bytes.
        size: usize,
        /// Maximum payload size allowed on the wire.
        max: usize,
    },
    /// The server answered with something the protocol does not allow.
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] Violation),
    /// The cancellation signal was observed at a checkpoint.
    #[error("cancelled")]
    Cancelled,
    /// The bets input source could not be opened or read.
    #[error("failed to read bets: {0}")]
    Input(#[source] io::Error),
    /// An input line did not hold the expected number of fields.
    #[error("line {line}: expected {expected} fields, found {found}")]
    Parse {
        /// One-based line number in the input source.
        line: usize,
        /// Number of comma-separated fields required.
        expected: usize,
        /// Number of comma-separated fields present.
        found: usize,
    },
    /// The client configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Returns `true` when the phase stopped because cancellation was requested.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool { matches!(self, Self::Cancelled) }
}
