//! Error type shared by the submission, completion and polling steps.

use std::{io, time::Duration};

use thiserror::Error;

use crate::{codec::CodecError, frame::FrameError, message_type::MessageType};

/// Errors surfaced by [`AgencyClient`](crate::client::AgencyClient) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Framing or transport failure on an open connection.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The aggregator could not be reached.
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),
    /// The aggregator confirmed a different bet than the batch's last one.
    #[error("ack mismatch: sent {expected}, confirmed {confirmed}")]
    AckMismatch {
        /// Number of the last bet in the batch.
        expected: u32,
        /// Number the aggregator acknowledged.
        confirmed: u32,
    },
    /// A batch kept failing after every allowed retry.
    #[error("batch {batch} failed {failures} consecutive times")]
    TooManyFailures {
        /// Zero-based index of the failing batch.
        batch: usize,
        /// Number of consecutive failed attempts.
        failures: u32,
        /// Failure reported by the last attempt.
        #[source]
        last: Box<ClientError>,
    },
    /// The `DONE` handshake did not complete.
    #[error("DONE handshake failed")]
    DoneFailed(#[source] Box<ClientError>),
    /// The aggregator answered with a message that is not valid here.
    #[error("unexpected {0} reply")]
    UnexpectedReply(MessageType),
    /// Winners did not become available within the configured bound.
    #[error("winners not available after {0:?}")]
    PollDeadlineExceeded(Duration),
}

impl ClientError {
    /// Returns `true` for failures a fresh connection may cure.
    ///
    /// Encoding errors and protocol violations are excluded: resending the
    /// same bytes would fail the same way.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Frame(_)
                | Self::Connect(_)
                | Self::AckMismatch { .. }
                | Self::Codec(CodecError::InvalidAck(_))
        )
    }
}
