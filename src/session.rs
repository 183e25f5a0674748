//! Bet submission phase.
//!
//! A session opens a single connection, announces a bet submission, then sends
//! the input as a strictly sequential series of length-prefixed batches. Each
//! batch must be acknowledged with `OK\n` before the next one is read. The
//! cancellation signal is checked after every acknowledgment, so the batch in
//! flight when cancellation arrives is still delivered.
//!
//! The connection is released exactly once on every exit path.

use std::{num::NonZeroUsize, time::Duration};

use tokio::io::AsyncBufRead;
use tracing::debug;

use crate::{
    batch::{BetReader, encode_batch},
    cancel::CancelSignal,
    connector::Connector,
    errors::{ClientError, Violation},
    framing::FramedChannel,
    protocol::{ACK_OK, RequestType},
};

/// Lifecycle of a submission session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    /// No connection has been opened yet.
    Idle,
    /// Connected; the request code has not been acknowledged by a batch yet.
    Connected,
    /// Streaming batches.
    Sending,
    /// Input exhausted and every batch acknowledged.
    Done,
    /// Stopped by an error or by cancellation.
    Aborted,
}

/// Totals for a completed submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    /// Batches acknowledged by the server.
    pub batches: usize,
    /// Bets contained in those batches.
    pub bets: usize,
}

/// Drives the "send every batch, await each acknowledgment" phase.
pub struct SubmissionSession<'a, C> {
    connector: &'a C,
    cancel: &'a CancelSignal,
    batch_size: NonZeroUsize,
    io_timeout: Option<Duration>,
    state: SubmissionState,
}

impl<'a, C> SubmissionSession<'a, C>
where
    C: Connector,
{
    /// Create a session that sends at most `batch_size` bets per batch.
    #[must_use = "create a session"]
    pub const fn new(connector: &'a C, cancel: &'a CancelSignal, batch_size: NonZeroUsize) -> Self {
        Self {
            connector,
            cancel,
            batch_size,
            io_timeout: None,
            state: SubmissionState::Idle,
        }
    }

    /// Apply a deadline to every read and write on the session connection.
    #[must_use]
    pub const fn with_io_timeout(mut self, io_timeout: Option<Duration>) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SubmissionState { self.state }

    fn transition(&mut self, next: SubmissionState) {
        debug!(from = ?self.state, to = ?next, "submission state change");
        self.state = next;
    }

    /// Submit every remaining bet from `source` over a single connection.
    ///
    /// # Errors
    /// Returns [`ClientError::Transport`] if the connection cannot be opened
    /// or fails mid-exchange, [`ClientError::PayloadTooLarge`] for a batch
    /// over the wire cap, [`ClientError::ProtocolViolation`] when a batch is
    /// not acknowledged with `OK\n`, [`ClientError::Cancelled`] when the
    /// signal is observed after an acknowledgment, and the input errors
    /// raised by `source`.
    pub async fn run<R>(&mut self, source: &mut BetReader<R>) -> Result<SubmissionReport, ClientError>
    where
        R: AsyncBufRead + Unpin,
    {
        let stream = match self.connector.connect().await {
            Ok(stream) => stream,
            Err(e) => {
                self.transition(SubmissionState::Aborted);
                return Err(e.into());
            }
        };
        self.transition(SubmissionState::Connected);
        let mut channel = FramedChannel::new(stream).with_timeout(self.io_timeout);
        let outcome = self.send_all(&mut channel, source).await;
        channel.close().await;
        self.transition(if outcome.is_ok() {
            SubmissionState::Done
        } else {
            SubmissionState::Aborted
        });
        outcome
    }

    async fn send_all<S, R>(
        &mut self,
        channel: &mut FramedChannel<S>,
        source: &mut BetReader<R>,
    ) -> Result<SubmissionReport, ClientError>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
        R: AsyncBufRead + Unpin,
    {
        channel.write_request(RequestType::SubmitBets).await?;
        self.transition(SubmissionState::Sending);
        let mut report = SubmissionReport::default();
        loop {
            let batch = source.next_batch(self.batch_size.get()).await?;
            if batch.is_empty() {
                return Ok(report);
            }
            let payload = encode_batch(&batch)?;
            channel.write_frame(&payload).await?;
            let ack = channel.read_raw_line().await?;
            if ack != ACK_OK.as_bytes() {
                let line = String::from_utf8_lossy(&ack).into_owned();
                return Err(Violation::UnexpectedAck(line).into());
            }
            report.batches += 1;
            report.bets += batch.len();
            debug!(
                batch = report.batches,
                bets = batch.len(),
                bytes = payload.len(),
                "batch acknowledged"
            );
            if self.cancel.is_set() {
                debug!(
                    batches = report.batches,
                    bets = report.bets,
                    "cancellation observed after acknowledgment"
                );
                return Err(ClientError::Cancelled);
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "test assertions")]
mod tests {
    use std::io::Cursor;

    use rstest::{fixture, rstest};
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::test_helpers::{ScriptedConnector, read_batch, read_request_code, serve_submission};

    fn input(n: usize) -> BetReader<Cursor<String>> {
        let lines: String = (0..n)
            .map(|i| format!("Ana,Diaz,{i},1990-01-01,{}\n", 1000 + i))
            .collect();
        BetReader::new(Cursor::new(lines), "1")
    }

    fn size(n: usize) -> NonZeroUsize { NonZeroUsize::new(n).expect("non-zero batch size") }

    #[fixture]
    fn connector() -> ScriptedConnector { ScriptedConnector::new() }

    #[rstest]
    #[case(0, 3, 0)]
    #[case(1, 3, 1)]
    #[case(6, 3, 2)]
    #[case(7, 3, 3)]
    #[case(7, 1, 7)]
    #[tokio::test]
    async fn sends_ceil_n_over_k_batches(
        connector: ScriptedConnector,
        #[case] bets: usize,
        #[case] batch_size: usize,
        #[case] expected: usize,
    ) {
        let server = connector.script(|s| serve_submission(s, Vec::new()));
        let cancel = CancelSignal::new();
        let mut session = SubmissionSession::new(&connector, &cancel, size(batch_size));
        let report = session.run(&mut input(bets)).await.expect("submit");
        assert_eq!(report, SubmissionReport {
            batches: expected,
            bets
        });
        assert_eq!(session.state(), SubmissionState::Done);
        let batches = server.await.expect("server task").expect("server io");
        assert_eq!(batches.len(), expected);
        let lines: Vec<&str> = batches.iter().flat_map(|b| b.lines()).collect();
        assert_eq!(lines.len(), bets);
        assert!(lines.first().is_none_or(|l| *l == "1,Ana,Diaz,0,1990-01-01,1000"));
    }

    #[rstest]
    #[tokio::test]
    async fn rejected_ack_aborts_without_further_batches(connector: ScriptedConnector) {
        let server = connector.script(|s| serve_submission(s, vec!["ERROR\n"]));
        let cancel = CancelSignal::new();
        let mut session = SubmissionSession::new(&connector, &cancel, size(2));
        let err = session.run(&mut input(6)).await.expect_err("should fail");
        assert!(
            matches!(&err, ClientError::ProtocolViolation(Violation::UnexpectedAck(line)) if line == "ERROR\n"),
            "unexpected error {err:?}"
        );
        assert_eq!(session.state(), SubmissionState::Aborted);
        let batches = server.await.expect("server task").expect("server io");
        assert_eq!(batches.len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn cancellation_is_checked_after_the_in_flight_batch(connector: ScriptedConnector) {
        let server = connector.script(|s| serve_submission(s, Vec::new()));
        let cancel = CancelSignal::new();
        cancel.cancel();
        let mut session = SubmissionSession::new(&connector, &cancel, size(2));
        let err = session.run(&mut input(6)).await.expect_err("should cancel");
        assert!(err.is_cancelled());
        assert_eq!(session.state(), SubmissionState::Aborted);
        let batches = server.await.expect("server task").expect("server io");
        assert_eq!(batches.len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn oversized_batch_aborts_before_sending(connector: ScriptedConnector) {
        let server = connector.script(|s| serve_submission(s, Vec::new()));
        let cancel = CancelSignal::new();
        let long_name = "x".repeat(9000);
        let line = format!("{long_name},Diaz,1,1990-01-01,7\n");
        let mut source = BetReader::new(Cursor::new(line), "1");
        let mut session = SubmissionSession::new(&connector, &cancel, size(5));
        let err = session.run(&mut source).await.expect_err("should fail");
        assert!(matches!(err, ClientError::PayloadTooLarge { .. }));
        let batches = server.await.expect("server task").expect("server io");
        assert!(batches.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn connect_failure_is_transport_error(connector: ScriptedConnector) {
        let cancel = CancelSignal::new();
        let mut session = SubmissionSession::new(&connector, &cancel, size(5));
        let err = session.run(&mut input(3)).await.expect_err("should fail");
        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(session.state(), SubmissionState::Aborted);
    }

    #[rstest]
    #[tokio::test]
    async fn server_hangup_mid_batch_is_transport_error(connector: ScriptedConnector) {
        connector.script(|mut s| async move {
            let _request = read_request_code(&mut s).await;
            drop(s);
        });
        let cancel = CancelSignal::new();
        let mut session = SubmissionSession::new(&connector, &cancel, size(5));
        let err = session.run(&mut input(3)).await.expect_err("should fail");
        assert!(matches!(err, ClientError::Transport(_)), "unexpected error {err:?}");
    }

    #[rstest]
    #[tokio::test]
    async fn malformed_line_aborts_after_earlier_batches(connector: ScriptedConnector) {
        let server = connector.script(|s| serve_submission(s, Vec::new()));
        let cancel = CancelSignal::new();
        let text = "Ana,Diaz,1,1990-01-01,7\nLuis,Paz\n";
        let mut source = BetReader::new(Cursor::new(text), "1");
        let mut session = SubmissionSession::new(&connector, &cancel, size(1));
        let err = session.run(&mut source).await.expect_err("should fail");
        assert!(matches!(err, ClientError::Parse { line: 2, .. }));
        let batches = server.await.expect("server task").expect("server io");
        assert_eq!(batches, vec!["1,Ana,Diaz,1,1990-01-01,7\n".to_owned()]);
    }

    #[rstest]
    #[tokio::test]
    async fn non_utf8_ack_is_protocol_violation(connector: ScriptedConnector) {
        let server = connector.script(|mut s| async move {
            read_request_code(&mut s).await?;
            let batch = read_batch(&mut s).await?;
            s.write_all(b"\xffERR\n").await?;
            Ok::<_, std::io::Error>(batch)
        });
        let cancel = CancelSignal::new();
        let mut session = SubmissionSession::new(&connector, &cancel, size(2));
        let err = session.run(&mut input(4)).await.expect_err("should fail");
        assert!(
            matches!(&err, ClientError::ProtocolViolation(Violation::UnexpectedAck(line)) if line == "\u{FFFD}ERR\n"),
            "unexpected error {err:?}"
        );
        assert_eq!(session.state(), SubmissionState::Aborted);
        let batch = server.await.expect("server task").expect("server io");
        assert!(batch.is_some());
    }
}
