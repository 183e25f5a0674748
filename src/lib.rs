//! Core library for the betwire lottery agency client.
//!
//! The client uploads an agency's bets to the lottery server in acknowledged,
//! length-prefixed CSV batches, then polls the same server until the draw
//! result for that agency is available. The protocol engine lives in
//! [`session`] and [`poller`]; [`framing`] owns the wire format and
//! [`cancel`] the cooperative shutdown signal shared by both phases.

pub mod batch;
pub mod bet;
pub mod cancel;
pub mod client;
pub mod config;
pub mod connector;
pub mod errors;
pub mod framing;
pub mod logging;
pub mod poller;
pub mod protocol;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_helpers;

pub use client::{Client, RunOutcome};
pub use errors::{ClientError, Violation};
