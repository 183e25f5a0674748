//! Batch encoding and the ordered bet source feeding it.
//!
//! A batch is transient: [`BetReader::next_batch`] pulls the next slice of
//! input lines, [`encode_batch`] renders it, and the caller sends and drops it.
//! An empty batch signals that the input is exhausted.

use bytes::{Bytes, BytesMut};
use camino::Utf8Path;
use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines},
};

use crate::{bet::Bet, errors::ClientError, protocol::MAX_PAYLOAD_SIZE};

/// Upper bound on bets preallocated per batch, whatever the configured size.
const PREALLOC_LIMIT: usize = 1024;

/// Encode a batch as concatenated CSV lines, one per bet, in batch order.
///
/// # Errors
/// Returns [`ClientError::PayloadTooLarge`] when the encoded payload would
/// exceed [`MAX_PAYLOAD_SIZE`]; nothing is encoded in that case.
pub fn encode_batch(bets: &[Bet]) -> Result<Bytes, ClientError> {
    let size: usize = bets.iter().map(Bet::encoded_len).sum();
    if size > MAX_PAYLOAD_SIZE {
        return Err(ClientError::PayloadTooLarge {
            size,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    let mut buf = BytesMut::with_capacity(size);
    for bet in bets {
        bet.encode_into(&mut buf);
    }
    Ok(buf.freeze())
}

/// Ordered reader that turns agency input lines into batches of bets.
///
/// Blank lines are skipped. Any other line that does not hold exactly five
/// fields stops the reader with [`ClientError::Parse`].
pub struct BetReader<R> {
    lines: Lines<R>,
    agency: String,
    position: usize,
}

impl BetReader<BufReader<File>> {
    /// Open an agency input file.
    ///
    /// # Errors
    /// Returns [`ClientError::Input`] if the file cannot be opened.
    pub async fn open(path: &Utf8Path, agency: impl Into<String>) -> Result<Self, ClientError> {
        let file = File::open(path).await.map_err(ClientError::Input)?;
        Ok(Self::new(BufReader::new(file), agency))
    }
}

impl<R> BetReader<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Wrap a buffered line source; every bet is stamped with `agency`.
    #[must_use = "create a reader"]
    pub fn new(reader: R, agency: impl Into<String>) -> Self {
        Self {
            lines: reader.lines(),
            agency: agency.into(),
            position: 0,
        }
    }

    /// Number of input lines consumed so far.
    #[must_use]
    pub const fn position(&self) -> usize { self.position }

    /// Pull up to `max` bets from the source, preserving input order.
    ///
    /// Returns an empty batch once the input is exhausted.
    ///
    /// # Errors
    /// Returns [`ClientError::Input`] on read failures and
    /// [`ClientError::Parse`] on malformed lines.
    pub async fn next_batch(&mut self, max: usize) -> Result<Vec<Bet>, ClientError> {
        let mut batch = Vec::with_capacity(max.min(PREALLOC_LIMIT));
        while batch.len() < max {
            let Some(line) = self.lines.next_line().await.map_err(ClientError::Input)? else {
                break;
            };
            self.position += 1;
            if line.trim().is_empty() {
                continue;
            }
            batch.push(Bet::from_input_line(&self.agency, &line, self.position)?);
        }
        Ok(batch)
    }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "test assertions")]
mod tests {
    use std::io::Cursor;

    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;
    use crate::bet::WIRE_FIELDS;

    fn bets(n: usize) -> Vec<Bet> {
        (0..n)
            .map(|i| Bet::new("1", "Ana", "Diaz", i.to_string(), "1990-01-01", "42"))
            .collect()
    }

    fn bet_with_len(len: usize) -> Bet {
        let padding = len - WIRE_FIELDS;
        Bet::new("", "", "", "x".repeat(padding), "", "")
    }

    #[rstest]
    fn encodes_lines_in_batch_order() {
        let payload = encode_batch(&bets(2)).expect("encode");
        assert_eq!(
            payload.as_ref(),
            b"1,Ana,Diaz,0,1990-01-01,42\n1,Ana,Diaz,1,1990-01-01,42\n"
        );
    }

    #[rstest]
    fn empty_batch_encodes_to_empty_payload() {
        assert!(encode_batch(&[]).expect("encode").is_empty());
    }

    #[rstest]
    fn payload_at_cap_is_accepted() {
        let batch = vec![bet_with_len(4096), bet_with_len(4096)];
        let payload = encode_batch(&batch).expect("encode");
        assert_eq!(payload.len(), MAX_PAYLOAD_SIZE);
    }

    #[rstest]
    fn payload_over_cap_is_rejected() {
        let batch = vec![bet_with_len(4096), bet_with_len(4097)];
        let err = encode_batch(&batch).expect_err("should fail");
        assert!(matches!(
            err,
            ClientError::PayloadTooLarge {
                size: 8193,
                max: MAX_PAYLOAD_SIZE
            }
        ));
    }

    #[rstest]
    fn encoding_is_deterministic() {
        let batch = bets(5);
        assert_eq!(
            encode_batch(&batch).expect("encode"),
            encode_batch(&batch).expect("encode")
        );
    }

    #[tokio::test]
    async fn reader_skips_blank_lines_and_tracks_position() {
        let input = "Ana,Diaz,1,1990-01-01,7\n\nLuis,Paz,2,1991-02-02,8\n";
        let mut reader = BetReader::new(Cursor::new(input), "3");
        let batch = reader.next_batch(10).await.expect("batch");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.get(1).map(Bet::document), Some("2"));
        assert_eq!(batch.get(1).map(Bet::agency), Some("3"));
        assert_eq!(reader.position(), 3);
        assert!(reader.next_batch(10).await.expect("batch").is_empty());
    }

    #[tokio::test]
    async fn reader_reports_malformed_line_number() {
        let input = "Ana,Diaz,1,1990-01-01,7\nLuis,Paz\n";
        let mut reader = BetReader::new(Cursor::new(input), "3");
        let err = reader.next_batch(10).await.expect_err("should fail");
        assert!(matches!(
            err,
            ClientError::Parse {
                line: 2,
                found: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn opens_agency_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("agency-4.csv"))
            .expect("utf-8 path");
        std::fs::write(&path, "Ana,Diaz,1,1990-01-01,7\r\nLuis,Paz,2,1991-02-02,8\r\n")
            .expect("write bets");
        let mut reader = BetReader::open(&path, "4").await.expect("open");
        let batch = reader.next_batch(1).await.expect("batch");
        assert_eq!(batch, vec![Bet::new("4", "Ana", "Diaz", "1", "1990-01-01", "7")]);
        assert_eq!(reader.next_batch(5).await.expect("batch").len(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_input_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("agency-9.csv"))
            .expect("utf-8 path");
        let err = BetReader::open(&path, "9").await.err().expect("should fail");
        assert!(matches!(err, ClientError::Input(e) if e.kind() == std::io::ErrorKind::NotFound));
    }

    fn read_all(input: &str, size: usize) -> Vec<Vec<Bet>> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        rt.block_on(async {
            let mut reader = BetReader::new(Cursor::new(input.to_owned()), "1");
            let mut batches = Vec::new();
            loop {
                let batch = reader.next_batch(size).await.expect("batch");
                if batch.is_empty() {
                    break batches;
                }
                batches.push(batch);
            }
        })
    }

    proptest! {
        #[test]
        fn batches_partition_input_in_order(n in 0usize..60, size in 1usize..12) {
            let input: String = (0..n)
                .map(|i| format!("Ana,Diaz,{i},1990-01-01,7\n"))
                .collect();
            let batches = read_all(&input, size);
            prop_assert_eq!(batches.len(), n.div_ceil(size));
            prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
            let documents: Vec<String> = batches
                .iter()
                .flatten()
                .map(|bet| bet.document().to_owned())
                .collect();
            let expected: Vec<String> = (0..n).map(|i| i.to_string()).collect();
            prop_assert_eq!(documents, expected);
        }
    }
}
