//! Client orchestrator.
//!
//! [`AgencyClient`] sequences a run: submit every record, announce `DONE`,
//! then poll for winners. Cancellation observed during submission ends the
//! run without the handshake or the winners query.

use std::time::Duration;

use tracing::info;

use crate::{
    codec::BetRecord,
    connector::{CONNECT_TIMEOUT, Connector},
    error::ClientError,
    frame::IO_TIMEOUT,
    shutdown::ShutdownToken,
    submitter::{self, ConnectionPolicy, DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES, SubmitReport},
    winners::{self, Phase},
};

/// Default pause between winners polls.
pub const POLL_BACKOFF: Duration = Duration::from_millis(100);

/// Validated runtime settings for one agency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Agency identifier written into every bet and control message.
    pub agency: u8,
    /// Aggregator `host:port`.
    pub server_address: String,
    /// Maximum records per batch.
    pub batch_size: usize,
    /// Retries allowed for a failing batch.
    pub max_retries: u32,
    /// Connection lifetime during submission.
    pub policy: ConnectionPolicy,
    /// Pause between winners polls.
    pub poll_backoff: Duration,
    /// Upper bound on winners polling; `None` polls until cancelled.
    pub max_poll: Option<Duration>,
    /// Deadline for each frame read or write.
    pub io_timeout: Duration,
    /// Deadline for establishing a connection.
    pub connect_timeout: Duration,
}

impl ClientSettings {
    /// Settings for `agency` at `server_address` with every other value at its
    /// default.
    #[must_use]
    pub fn new(agency: u8, server_address: impl Into<String>) -> Self {
        Self {
            agency,
            server_address: server_address.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            policy: ConnectionPolicy::default(),
            poll_backoff: POLL_BACKOFF,
            max_poll: None,
            io_timeout: IO_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(agency: u8) -> Self {
        Self {
            poll_backoff: Duration::from_millis(5),
            io_timeout: Duration::from_secs(2),
            ..Self::new(agency, "scripted")
        }
    }
}

/// Outcome of [`AgencyClient::run`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunReport {
    /// Records confirmed by the aggregator.
    pub confirmed: usize,
    /// Winning DNIs for this agency; empty when cancelled.
    pub winners: Vec<String>,
    /// The run stopped early because cancellation was requested. A winners
    /// list that already arrived is still reported as a completed run.
    pub cancelled: bool,
}

/// Drives one agency through submission, completion and winners polling.
#[derive(Debug)]
pub struct AgencyClient<C> {
    connector: C,
    settings: ClientSettings,
    shutdown: ShutdownToken,
}

impl<C: Connector> AgencyClient<C> {
    /// Create a client that dials through `connector`.
    #[must_use]
    pub const fn new(connector: C, settings: ClientSettings, shutdown: ShutdownToken) -> Self {
        Self {
            connector,
            settings,
            shutdown,
        }
    }

    /// Settings this client runs with.
    #[must_use]
    pub const fn settings(&self) -> &ClientSettings { &self.settings }

    /// Submit `records` in acknowledged batches.
    ///
    /// # Errors
    /// See [`submitter::submit_all`].
    pub async fn submit_all(&self, records: &[BetRecord]) -> Result<SubmitReport, ClientError> {
        submitter::submit_all(&self.connector, &self.settings, records, &self.shutdown).await
    }

    /// Announce that this agency finished submitting.
    ///
    /// # Errors
    /// See [`winners::send_done`].
    pub async fn send_done(&self) -> Result<(), ClientError> {
        winners::send_done(&self.connector, &self.settings).await
    }

    /// Poll until the winners list is available.
    ///
    /// # Errors
    /// See [`winners::poll_winners`].
    pub async fn poll_winners(&self) -> Result<Vec<String>, ClientError> {
        winners::poll_winners(&self.connector, &self.settings, &self.shutdown).await
    }

    /// Run the whole protocol for `records`.
    ///
    /// # Errors
    /// Propagates the first fatal error from submission, the `DONE` handshake
    /// or winners polling.
    pub async fn run(&self, records: &[BetRecord]) -> Result<RunReport, ClientError> {
        let agency = self.settings.agency;
        info!(
            agency,
            records = records.len(),
            phase = %Phase::Submitting,
            "action: run | result: in_progress"
        );
        let submitted = self.submit_all(records).await?;
        if submitted.cancelled || self.shutdown.is_cancelled() {
            return Ok(self.cancelled(submitted.confirmed));
        }
        info!(
            agency,
            confirmed = submitted.confirmed,
            batches = submitted.batches,
            phase = %Phase::AllBatchesConfirmed,
            "action: send_batches | result: success"
        );

        info!(
            agency,
            phase = %Phase::DoneSent,
            "action: done | result: in_progress"
        );
        self.send_done().await?;
        info!(agency, phase = %Phase::AckReceived, "action: done | result: success");

        info!(
            agency,
            phase = %Phase::PollingWinners,
            "action: consulta_ganadores | result: in_progress"
        );
        let winners = self.poll_winners().await?;
        if winners.is_empty() && self.shutdown.is_cancelled() {
            return Ok(self.cancelled(submitted.confirmed));
        }
        info!(
            agency,
            winners = winners.len(),
            phase = %Phase::WinnersReceived,
            "action: consulta_ganadores | result: success"
        );
        Ok(RunReport {
            confirmed: submitted.confirmed,
            winners,
            cancelled: false,
        })
    }

    fn cancelled(&self, confirmed: usize) -> RunReport {
        info!(
            agency = self.settings.agency,
            confirmed,
            phase = %Phase::Cancelled,
            "action: run | result: cancelled"
        );
        RunReport {
            confirmed,
            winners: Vec::new(),
            cancelled: true,
        }
    }
}
