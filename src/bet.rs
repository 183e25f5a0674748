//! Bet records and their CSV line codec.
//!
//! Input files carry one bet per line as
//! `first_name,last_name,document,birthdate,number`; the agency is supplied by
//! the client configuration. On the wire each bet is rendered with the agency
//! prepended. Field contents are never validated; only the field count is.

use bytes::{BufMut, BytesMut};

use crate::errors::ClientError;

/// Number of comma-separated fields in an input file line.
pub const INPUT_FIELDS: usize = 5;
/// Number of comma-separated fields in an encoded wire line.
pub const WIRE_FIELDS: usize = 6;

/// A single wager placed through an agency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bet {
    agency: String,
    first_name: String,
    last_name: String,
    document: String,
    birthdate: String,
    number: String,
}

fn split_fields<const N: usize>(line: &str, line_no: usize) -> Result<[&str; N], ClientError> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();
    let found = fields.len();
    <[&str; N]>::try_from(fields).map_err(|_| ClientError::Parse {
        line: line_no,
        expected: N,
        found,
    })
}

impl Bet {
    /// Build a bet from its individual fields.
    #[must_use]
    pub fn new(
        agency: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        document: impl Into<String>,
        birthdate: impl Into<String>,
        number: impl Into<String>,
    ) -> Self {
        Self {
            agency: agency.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            document: document.into(),
            birthdate: birthdate.into(),
            number: number.into(),
        }
    }

    /// Parse a line from an agency input file.
    ///
    /// `line_no` is only used to locate the offending line in errors.
    ///
    /// # Errors
    /// Returns [`ClientError::Parse`] unless the line holds exactly
    /// [`INPUT_FIELDS`] fields.
    pub fn from_input_line(agency: &str, line: &str, line_no: usize) -> Result<Self, ClientError> {
        let [first_name, last_name, document, birthdate, number] =
            split_fields::<INPUT_FIELDS>(line, line_no)?;
        Ok(Self::new(
            agency, first_name, last_name, document, birthdate, number,
        ))
    }

    /// Parse a line in the wire encoding produced by [`Bet::encode_into`].
    ///
    /// # Errors
    /// Returns [`ClientError::Parse`] unless the line holds exactly
    /// [`WIRE_FIELDS`] fields.
    pub fn from_wire_line(line: &str, line_no: usize) -> Result<Self, ClientError> {
        let [agency, first_name, last_name, document, birthdate, number] =
            split_fields::<WIRE_FIELDS>(line, line_no)?;
        Ok(Self::new(
            agency, first_name, last_name, document, birthdate, number,
        ))
    }

    /// Append this bet to `buf` as a newline-terminated CSV line.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let fields = [
            &self.agency,
            &self.first_name,
            &self.last_name,
            &self.document,
            &self.birthdate,
            &self.number,
        ];
        for (idx, field) in fields.into_iter().enumerate() {
            if idx > 0 {
                buf.put_u8(b',');
            }
            buf.put_slice(field.as_bytes());
        }
        buf.put_u8(b'\n');
    }

    /// Length in bytes of the encoded wire line, terminator included.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.agency.len()
            + self.first_name.len()
            + self.last_name.len()
            + self.document.len()
            + self.birthdate.len()
            + self.number.len()
            + WIRE_FIELDS
    }

    /// Submitting agency.
    #[must_use]
    pub fn agency(&self) -> &str { &self.agency }

    /// Bettor's first name.
    #[must_use]
    pub fn first_name(&self) -> &str { &self.first_name }

    /// Bettor's last name.
    #[must_use]
    pub fn last_name(&self) -> &str { &self.last_name }

    /// Bettor's identity document number.
    #[must_use]
    pub fn document(&self) -> &str { &self.document }

    /// Bettor's birthdate as written in the input.
    #[must_use]
    pub fn birthdate(&self) -> &str { &self.birthdate }

    /// Wagered lottery number.
    #[must_use]
    pub fn number(&self) -> &str { &self.number }
}
