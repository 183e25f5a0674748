//! Constants and tagged types for the lottery wire protocol.
//!
//! Every exchange opens with a one-byte request code. Bet submission then
//! streams length-prefixed CSV batches, each acknowledged by a text line.
//! Winner queries read a one-byte readiness code and, when ready, send the
//! agency id and read back a comma-separated winners line. All multi-byte
//! integers are big-endian.
//!
//! Raw protocol bytes are decoded once into [`RequestType`] and [`Readiness`]
//! at the wire boundary; nothing past this module compares magic numbers.

use std::{fmt, num::ParseIntError, str::FromStr};

/// Maximum encoded batch payload accepted by the server, in bytes.
pub const MAX_PAYLOAD_SIZE: usize = 8192;
/// Acknowledgment line sent by the server after storing a batch.
pub const ACK_OK: &str = "OK\n";

/// Wire code for a bet submission request.
pub const SUBMIT_BETS: u8 = 1;
/// Wire code for a winners query request.
pub const QUERY_WINNERS: u8 = 2;
/// Readiness code indicating the lottery draw has completed.
pub const READY: u8 = 1;

/// Request types understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// Upload batches of bets for an agency.
    SubmitBets,
    /// Ask whether winners are available and fetch them.
    QueryWinners,
}

impl From<RequestType> for u8 {
    fn from(ty: RequestType) -> Self {
        match ty {
            RequestType::SubmitBets => SUBMIT_BETS,
            RequestType::QueryWinners => QUERY_WINNERS,
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubmitBets => f.write_str("SubmitBets"),
            Self::QueryWinners => f.write_str("QueryWinners"),
        }
    }
}

/// Server answer to a winners query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Winners are available on this connection.
    Ready,
    /// The draw has not happened yet; ask again later.
    NotReady,
}

impl From<u8> for Readiness {
    fn from(code: u8) -> Self {
        if code == READY {
            Self::Ready
        } else {
            Self::NotReady
        }
    }
}

/// Numeric agency identifier carried on the wire as a big-endian `u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgencyId(u16);

impl AgencyId {
    /// Wrap a raw agency number.
    #[must_use]
    pub const fn new(id: u16) -> Self { Self(id) }

    /// Return the raw agency number.
    #[must_use]
    pub const fn get(self) -> u16 { self.0 }
}

impl FromStr for AgencyId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { s.trim().parse().map(Self) }
}

impl fmt::Display for AgencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// Parse the winners line returned after a ready readiness code.
///
/// Trailing whitespace (including the line terminator) is trimmed first. An
/// empty line means the agency has no winners and yields an empty list rather
/// than a single empty document.
#[must_use]
pub fn parse_winners(line: &str) -> Vec<String> {
    let trimmed = line.trim_end();
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split(',').map(str::to_owned).collect()
}
