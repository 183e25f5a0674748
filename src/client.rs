//! Two-phase client: submit the agency's bets, then poll for its winners.
//!
//! [`Client::run`] runs the submission phase to completion before starting
//! the winner poller. Both phases share one cancellation signal and obtain
//! connections from the same [`Connector`]. Outcomes are reported through
//! `tracing`; cancellation is logged quietly rather than as a failure.

use anyhow::{Context, Result};
use clap::Parser;
use cli_defs::Cli;
use tokio::io::AsyncBufRead;
use tracing::{debug, error, info};

use crate::{
    batch::BetReader,
    cancel::{CancelSignal, listen_for_termination},
    config::ClientConfig,
    connector::{Connector, TcpConnector},
    errors::ClientError,
    logging,
    poller::{WinnerPoller, WinnersReport},
    session::{SubmissionReport, SubmissionSession},
};

/// How a full client run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Both phases completed.
    Completed {
        /// Submission totals.
        submission: SubmissionReport,
        /// Winners for this agency.
        winners: WinnersReport,
    },
    /// Cancellation was observed during one of the phases.
    Cancelled,
}

/// Agency client bound to a configuration and a connection factory.
pub struct Client<C> {
    config: ClientConfig,
    connector: C,
    cancel: CancelSignal,
}

impl Client<TcpConnector> {
    /// Create a TCP client for the configured server address.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let connector = TcpConnector::new(config.server_address());
        Self::with_connector(config, connector, CancelSignal::new())
    }
}

impl<C> Client<C>
where
    C: Connector,
{
    /// Create a client with an explicit connector and cancellation signal.
    #[must_use]
    pub const fn with_connector(config: ClientConfig, connector: C, cancel: CancelSignal) -> Self {
        Self {
            config,
            connector,
            cancel,
        }
    }

    /// Configuration the client was built with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig { &self.config }

    /// Signal observed by both phases.
    #[must_use]
    pub const fn cancel_signal(&self) -> &CancelSignal { &self.cancel }

    /// Submit every bet from `source`.
    ///
    /// # Errors
    /// Propagates the terminal error of the submission session.
    pub async fn submit_from<R>(
        &self,
        source: &mut BetReader<R>,
    ) -> Result<SubmissionReport, ClientError>
    where
        R: AsyncBufRead + Unpin,
    {
        SubmissionSession::new(&self.connector, &self.cancel, self.config.batch_size())
            .with_io_timeout(self.config.io_timeout())
            .run(source)
            .await
    }

    /// Submit every bet from the configured input file.
    ///
    /// # Errors
    /// Returns [`ClientError::Input`] if the file cannot be opened, otherwise
    /// the terminal error of the submission session.
    pub async fn submit_bets(&self) -> Result<SubmissionReport, ClientError> {
        let agency = self.config.agency().to_string();
        let mut source = BetReader::open(self.config.bets_file(), agency).await?;
        self.submit_from(&mut source).await
    }

    /// Poll the server until this agency's winners are available.
    ///
    /// # Errors
    /// Propagates the terminal error of the winner poller.
    pub async fn query_winners(&self) -> Result<WinnersReport, ClientError> {
        WinnerPoller::new(
            &self.connector,
            &self.cancel,
            self.config.agency(),
            self.config.loop_period(),
        )
        .with_io_timeout(self.config.io_timeout())
        .run()
        .await
    }

    /// Run the submission phase over `source`, then the winner poller.
    ///
    /// Cancellation is reported as [`RunOutcome::Cancelled`], not an error.
    ///
    /// # Errors
    /// Returns the first non-cancellation error raised by either phase.
    pub async fn run_with<R>(&self, source: &mut BetReader<R>) -> Result<RunOutcome, ClientError>
    where
        R: AsyncBufRead + Unpin,
    {
        let submitted = self.submit_from(source).await;
        self.finish(submitted).await
    }

    /// Run both phases using the configured input file.
    ///
    /// # Errors
    /// Returns the first non-cancellation error raised by either phase.
    pub async fn run(&self) -> Result<RunOutcome, ClientError> {
        let submitted = self.submit_bets().await;
        self.finish(submitted).await
    }

    async fn finish(
        &self,
        submitted: Result<SubmissionReport, ClientError>,
    ) -> Result<RunOutcome, ClientError> {
        let client_id = self.config.agency();
        let submission = match submitted {
            Ok(report) => {
                info!(
                    action = "send_bets",
                    result = "success",
                    %client_id,
                    batches = report.batches,
                    bets = report.bets,
                    "bets submitted"
                );
                report
            }
            Err(ClientError::Cancelled) => {
                debug!(action = "terminate_client", result = "success", %client_id, "client cancelled");
                return Ok(RunOutcome::Cancelled);
            }
            Err(e) => {
                error!(action = "send_bets", result = "fail", %client_id, error = %e, "bet submission failed");
                return Err(e);
            }
        };
        match self.query_winners().await {
            Ok(winners) => {
                info!(
                    action = "query_winners",
                    result = "success",
                    %client_id,
                    winners = winners.winners.len(),
                    attempts = winners.attempts,
                    "winners received"
                );
                Ok(RunOutcome::Completed {
                    submission,
                    winners,
                })
            }
            Err(ClientError::Cancelled) => {
                debug!(action = "terminate_client", result = "success", %client_id, "client cancelled");
                Ok(RunOutcome::Cancelled)
            }
            Err(e) => {
                error!(action = "query_winners", result = "fail", %client_id, error = %e, "winners query failed");
                Err(e)
            }
        }
    }
}

/// Parse CLI arguments, load configuration, and run the client.
///
/// # Errors
/// Returns any configuration, logging, or phase error.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    run_with_cli(&cli).await
}

/// Execute the client using an already parsed [`Cli`].
///
/// # Errors
/// Returns any configuration, logging, or phase error.
pub async fn run_with_cli(cli: &Cli) -> Result<()> {
    let config = ClientConfig::from_cli(cli).context("failed to load configuration")?;
    logging::init(config.log_level())?;
    info!(
        client_id = %config.agency(),
        server = config.server_address(),
        batch_size = config.batch_size().get(),
        loop_period = ?config.loop_period(),
        loop_lapse = ?config.loop_lapse(),
        "client configured"
    );
    let client = Client::new(config);
    let listener = listen_for_termination(client.cancel_signal().clone());
    let outcome = client.run().await;
    listener.abort();
    outcome?;
    Ok(())
}
