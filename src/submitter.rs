//! Batched bet submission with bounded reconnect-and-retry.
//!
//! Records are cut into contiguous chunks of at most
//! [`ClientSettings::batch_size`] and sent strictly in order. Each chunk is
//! encoded once and, on failure, resent byte-for-byte on a fresh connection:
//! a batch is either acknowledged as a whole or retried as a whole.

use std::{fmt, str::FromStr};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    client::ClientSettings,
    codec::{BetRecord, CodecError, decode_ack, encode_batch, encode_bet},
    connector::{self, Connector},
    error::ClientError,
    frame::FramedChannel,
    shutdown::ShutdownToken,
};

/// Records per batch when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 50;
/// Retries allowed for one batch before the run is aborted.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// How long submission connections live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPolicy {
    /// Open a fresh connection for every batch.
    #[default]
    PerBatch,
    /// Reuse one connection for the whole run, reconnecting only on failure.
    Persistent,
}

/// Unrecognised connection policy name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown connection policy {0:?}, expected \"per-batch\" or \"persistent\"")]
pub struct ParsePolicyError(String);

impl FromStr for ConnectionPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-batch" | "per_batch" => Ok(Self::PerBatch),
            "persistent" => Ok(Self::Persistent),
            _ => Err(ParsePolicyError(s.to_owned())),
        }
    }
}

impl fmt::Display for ConnectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerBatch => f.write_str("per-batch"),
            Self::Persistent => f.write_str("persistent"),
        }
    }
}

/// Outcome of [`submit_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmitReport {
    /// Records confirmed by an acknowledgement.
    pub confirmed: usize,
    /// Batches confirmed by an acknowledgement.
    pub batches: usize,
    /// Records dropped before submission because they failed validation.
    pub skipped: usize,
    /// Submission stopped early because cancellation was requested.
    pub cancelled: bool,
}

enum Delivery {
    Confirmed,
    Abandoned,
}

/// Submit every record in order, one acknowledged batch at a time.
///
/// Records that fail field or date validation are skipped with a warning
/// before batching. Cancellation is checked before each batch, and before
/// each retry of a failing batch. Any connection opened here is closed before
/// returning.
///
/// # Errors
/// Returns [`CodecError::BatchTooLarge`] for a batch that cannot be built, or
/// [`ClientError::TooManyFailures`] once a batch fails more than
/// [`ClientSettings::max_retries`] consecutive retries.
pub async fn submit_all<C: Connector>(
    connector: &C,
    settings: &ClientSettings,
    records: &[BetRecord],
    shutdown: &ShutdownToken,
) -> Result<SubmitReport, ClientError> {
    let mut submitter = BatchSubmitter {
        connector,
        settings,
        shutdown,
        channel: None,
    };
    let result = submitter.run(records).await;
    submitter.disconnect().await;
    result
}

fn valid_records(agency: u8, records: &[BetRecord]) -> Vec<BetRecord> {
    records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| match encode_bet(agency, record) {
            Ok(_) => Some(record.clone()),
            Err(err) => {
                warn!(
                    record = index,
                    number = record.number,
                    field = invalid_field(&err),
                    error = %err,
                    "action: validate_bet | result: fail"
                );
                None
            }
        })
        .collect()
}

const fn invalid_field(err: &CodecError) -> &'static str {
    match err {
        CodecError::FieldTooLong { field, .. } => *field,
        CodecError::InvalidDate(_) => "birth_date",
        _ => "record",
    }
}

struct BatchSubmitter<'a, C: Connector> {
    connector: &'a C,
    settings: &'a ClientSettings,
    shutdown: &'a ShutdownToken,
    channel: Option<FramedChannel<C::Stream>>,
}

impl<C: Connector> BatchSubmitter<'_, C> {
    async fn run(&mut self, records: &[BetRecord]) -> Result<SubmitReport, ClientError> {
        let valid = valid_records(self.settings.agency, records);
        let mut report = SubmitReport {
            skipped: records.len() - valid.len(),
            ..SubmitReport::default()
        };
        for (index, chunk) in valid.chunks(self.settings.batch_size.max(1)).enumerate() {
            if self.shutdown.is_cancelled() {
                info!(
                    batch = index,
                    confirmed = report.confirmed,
                    "action: send_batches | result: cancelled"
                );
                report.cancelled = true;
                return Ok(report);
            }
            let Some(last) = chunk.last() else { continue };
            let payload = encode_batch(self.settings.agency, chunk)?;
            match self.deliver(index, &payload, last.number).await? {
                Delivery::Confirmed => {
                    report.confirmed += chunk.len();
                    report.batches += 1;
                    info!(
                        batch = index,
                        "action: apuesta_enviada | result: success | cantidad: {}",
                        chunk.len()
                    );
                }
                Delivery::Abandoned => {
                    report.cancelled = true;
                    return Ok(report);
                }
            }
        }
        Ok(report)
    }

    async fn deliver(
        &mut self,
        batch: usize,
        payload: &[u8],
        expected: u32,
    ) -> Result<Delivery, ClientError> {
        let mut failures = 0u32;
        loop {
            match self.attempt(payload, expected).await {
                Ok(()) => {
                    if self.settings.policy == ConnectionPolicy::PerBatch {
                        self.disconnect().await;
                    }
                    return Ok(Delivery::Confirmed);
                }
                Err(err) if !err.is_transient() => {
                    self.disconnect().await;
                    return Err(err);
                }
                Err(err) => {
                    self.disconnect().await;
                    failures += 1;
                    warn!(
                        batch,
                        attempt = failures,
                        error = %err,
                        "action: send_batch | result: fail"
                    );
                    if self.shutdown.is_cancelled() {
                        info!(batch, "action: send_batch | result: abandoned");
                        return Ok(Delivery::Abandoned);
                    }
                    if failures > self.settings.max_retries {
                        return Err(ClientError::TooManyFailures {
                            batch,
                            failures,
                            last: Box::new(err),
                        });
                    }
                }
            }
        }
    }

    async fn attempt(&mut self, payload: &[u8], expected: u32) -> Result<(), ClientError> {
        let channel = self.connect().await?;
        channel.send_message(payload).await?;
        let reply = channel.recv_message().await?;
        let confirmed = decode_ack(&reply)?;
        if confirmed != expected {
            return Err(ClientError::AckMismatch {
                expected,
                confirmed,
            });
        }
        debug!(confirmed, "action: ack_received | result: success");
        Ok(())
    }

    async fn connect(&mut self) -> Result<&mut FramedChannel<C::Stream>, ClientError> {
        let channel = match self.channel.take() {
            Some(channel) => channel,
            None => connector::open(self.connector, self.settings.io_timeout).await?,
        };
        Ok(self.channel.insert(channel))
    }

    async fn disconnect(&mut self) {
        if let Some(channel) = self.channel.take() {
            connector::close(channel).await;
        }
    }
}
