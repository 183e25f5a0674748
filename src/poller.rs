//! Winner polling phase.
//!
//! Each attempt is a self-contained exchange on a fresh connection: send the
//! query code, read the readiness byte, and either fetch the winners list or
//! hang up and wait. The wait between attempts races the loop period against
//! the cancellation signal so a pending cancellation is never slept through.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::{
    cancel::{CancelSignal, WaitOutcome},
    connector::Connector,
    errors::{ClientError, Violation},
    framing::FramedChannel,
    protocol::{AgencyId, Readiness, RequestType, parse_winners},
};

/// Lifecycle of the winner poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// No attempt has been made yet.
    Idle,
    /// Query code written on a fresh connection.
    RequestSent,
    /// Waiting for the readiness byte.
    AwaitingReadiness,
    /// Winners are available; fetching them.
    Ready,
    /// The draw is not done; the connection is being released.
    NotReady,
    /// Waiting out the loop period before the next attempt.
    Retrying,
    /// Winners received.
    Done,
    /// Stopped by an error or by cancellation.
    Aborted,
}

/// Final result of a successful polling phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinnersReport {
    /// Documents of this agency's winning bets, in server order.
    pub winners: Vec<String>,
    /// Number of query attempts made, the successful one included.
    pub attempts: u32,
}

/// Drives the "ask, maybe wait, ask again" phase.
pub struct WinnerPoller<'a, C> {
    connector: &'a C,
    cancel: &'a CancelSignal,
    agency: AgencyId,
    period: Duration,
    io_timeout: Option<Duration>,
    state: PollState,
}

impl<'a, C> WinnerPoller<'a, C>
where
    C: Connector,
{
    /// Create a poller that waits `period` between attempts.
    #[must_use = "create a poller"]
    pub const fn new(
        connector: &'a C,
        cancel: &'a CancelSignal,
        agency: AgencyId,
        period: Duration,
    ) -> Self {
        Self {
            connector,
            cancel,
            agency,
            period,
            io_timeout: None,
            state: PollState::Idle,
        }
    }

    /// Apply a deadline to every read and write on each attempt's connection.
    #[must_use]
    pub const fn with_io_timeout(mut self, io_timeout: Option<Duration>) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> PollState { self.state }

    fn transition(&mut self, next: PollState) {
        debug!(from = ?self.state, to = ?next, "poll state change");
        self.state = next;
    }

    /// Poll until the server reports winners, cancellation fires, or an error
    /// occurs.
    ///
    /// # Errors
    /// Returns [`ClientError::Transport`] on connection failures,
    /// [`ClientError::ProtocolViolation`] if the server hangs up before the
    /// readiness byte, and [`ClientError::Cancelled`] when the signal fires
    /// during an inter-attempt wait.
    pub async fn run(&mut self) -> Result<WinnersReport, ClientError> {
        let outcome = self.poll().await;
        self.transition(if outcome.is_ok() {
            PollState::Done
        } else {
            PollState::Aborted
        });
        outcome
    }

    async fn poll(&mut self) -> Result<WinnersReport, ClientError> {
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            if let Some(winners) = self.attempt().await? {
                return Ok(WinnersReport { winners, attempts });
            }
            self.transition(PollState::Retrying);
            debug!(attempt = attempts, period = ?self.period, "winners not ready");
            if self.cancel.wait_timeout(self.period).await == WaitOutcome::Cancelled {
                return Err(ClientError::Cancelled);
            }
        }
    }

    async fn attempt(&mut self) -> Result<Option<Vec<String>>, ClientError> {
        let stream = self.connector.connect().await?;
        let mut channel = FramedChannel::new(stream).with_timeout(self.io_timeout);
        let outcome = self.exchange(&mut channel).await;
        channel.close().await;
        outcome
    }

    async fn exchange<S>(
        &mut self,
        channel: &mut FramedChannel<S>,
    ) -> Result<Option<Vec<String>>, ClientError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        channel.write_request(RequestType::QueryWinners).await?;
        self.transition(PollState::RequestSent);
        self.transition(PollState::AwaitingReadiness);
        let code = channel.read_u8().await?.ok_or(Violation::MissingReadiness)?;
        match Readiness::from(code) {
            Readiness::NotReady => {
                self.transition(PollState::NotReady);
                Ok(None)
            }
            Readiness::Ready => {
                self.transition(PollState::Ready);
                channel.write_u16(self.agency.get()).await?;
                let line = channel.read_line().await?;
                Ok(Some(parse_winners(&line)))
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "test assertions")]
mod tests {
    use rstest::{fixture, rstest};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        time::Instant,
    };

    use super::*;
    use crate::{
        protocol::READY,
        test_helpers::{ScriptedConnector, read_request_code, serve_not_ready, serve_winners_query},
    };

    const PERIOD: Duration = Duration::from_secs(5);

    #[fixture]
    fn connector() -> ScriptedConnector { ScriptedConnector::new() }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(3)]
    #[tokio::test(start_paused = true)]
    async fn waits_once_per_not_ready_answer(connector: ScriptedConnector, #[case] not_ready: u32) {
        let released: Vec<_> = (0..not_ready).map(|_| connector.script(serve_not_ready)).collect();
        let last = connector.script(|s| serve_winners_query(s, READY, "111,222"));
        let cancel = CancelSignal::new();
        let mut poller = WinnerPoller::new(&connector, &cancel, AgencyId::new(4), PERIOD);
        let start = Instant::now();
        let report = poller.run().await.expect("winners");
        assert_eq!(start.elapsed(), PERIOD * not_ready);
        assert_eq!(report, WinnersReport {
            winners: vec!["111".to_owned(), "222".to_owned()],
            attempts: not_ready + 1,
        });
        assert_eq!(poller.state(), PollState::Done);
        assert_eq!(connector.connects(), usize::try_from(not_ready + 1).expect("fits"));
        for (attempt, handle) in (0u32..).zip(released) {
            let closed_at = handle.await.expect("server task").expect("server io");
            assert_eq!(
                closed_at,
                start + PERIOD * attempt,
                "attempt {attempt} released its connection after the wait began"
            );
        }
        assert_eq!(last.await.expect("server task").expect("server io"), Some(4));
    }

    #[rstest]
    #[tokio::test]
    async fn empty_winners_line_is_empty_list(connector: ScriptedConnector) {
        connector.script(|s| serve_winners_query(s, READY, ""));
        let cancel = CancelSignal::new();
        let mut poller = WinnerPoller::new(&connector, &cancel, AgencyId::new(1), PERIOD);
        let report = poller.run().await.expect("winners");
        assert!(report.winners.is_empty());
        assert_eq!(report.attempts, 1);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn cancellation_during_wait_aborts(connector: ScriptedConnector) {
        connector.script(|s| serve_winners_query(s, 0, ""));
        connector.script(|s| serve_winners_query(s, READY, "111"));
        let cancel = CancelSignal::new();
        let remote = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            remote.cancel();
        });
        let mut poller = WinnerPoller::new(&connector, &cancel, AgencyId::new(1), PERIOD);
        let start = Instant::now();
        let err = poller.run().await.expect_err("should cancel");
        assert!(err.is_cancelled());
        assert!(start.elapsed() < PERIOD);
        assert_eq!(poller.state(), PollState::Aborted);
        assert_eq!(connector.connects(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn hangup_before_readiness_is_protocol_violation(connector: ScriptedConnector) {
        connector.script(|mut s| async move {
            let _request = read_request_code(&mut s).await;
        });
        let cancel = CancelSignal::new();
        let mut poller = WinnerPoller::new(&connector, &cancel, AgencyId::new(1), PERIOD);
        let err = poller.run().await.expect_err("should fail");
        assert!(matches!(
            err,
            ClientError::ProtocolViolation(Violation::MissingReadiness)
        ));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn connect_failure_after_not_ready_is_not_retried(connector: ScriptedConnector) {
        connector.script(|s| serve_winners_query(s, 0, ""));
        let cancel = CancelSignal::new();
        let mut poller = WinnerPoller::new(&connector, &cancel, AgencyId::new(1), PERIOD);
        let err = poller.run().await.expect_err("should fail");
        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(poller.state(), PollState::Aborted);
    }

    #[rstest]
    #[case(2)]
    #[case(255)]
    #[tokio::test(start_paused = true)]
    async fn unknown_readiness_codes_mean_not_ready(connector: ScriptedConnector, #[case] code: u8) {
        connector.script(move |s| serve_winners_query(s, code, ""));
        connector.script(|s| serve_winners_query(s, READY, "9"));
        let cancel = CancelSignal::new();
        let mut poller = WinnerPoller::new(&connector, &cancel, AgencyId::new(1), PERIOD);
        let report = poller.run().await.expect("winners");
        assert_eq!(report.winners, vec!["9".to_owned()]);
        assert_eq!(report.attempts, 2);
    }

    #[rstest]
    #[tokio::test]
    async fn hangup_after_ready_is_transport_error(connector: ScriptedConnector) {
        let server = connector.script(|mut s| async move {
            read_request_code(&mut s).await?;
            s.write_u8(READY).await?;
            s.read_u16().await
        });
        let cancel = CancelSignal::new();
        let mut poller = WinnerPoller::new(&connector, &cancel, AgencyId::new(6), PERIOD);
        let err = poller.run().await.expect_err("should fail");
        assert!(
            matches!(&err, ClientError::Transport(e) if e.kind() == std::io::ErrorKind::UnexpectedEof),
            "unexpected error {err:?}"
        );
        assert_eq!(poller.state(), PollState::Aborted);
        assert_eq!(server.await.expect("server task").expect("server io"), 6);
    }
}
