//! Completion handshake and winners polling.
//!
//! Once every batch is confirmed the agency announces `DONE` and then polls
//! with `GET_WINNERS` until the aggregator has run the draw. Each exchange
//! uses its own short-lived connection.

use std::fmt;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::{
    client::ClientSettings,
    codec::{decode_winners, encode_control, peek_type},
    connector::{self, Connector},
    error::ClientError,
    message_type::MessageType,
    shutdown::ShutdownToken,
};

/// Stage of a client run, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Batches are being sent.
    Submitting,
    /// Every batch was acknowledged.
    AllBatchesConfirmed,
    /// `DONE` was written.
    DoneSent,
    /// The aggregator answered `DONE`.
    AckReceived,
    /// Waiting for the draw.
    PollingWinners,
    /// The winners list arrived.
    WinnersReceived,
    /// The run stopped because cancellation was requested.
    Cancelled,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submitting => "submitting",
            Self::AllBatchesConfirmed => "all_batches_confirmed",
            Self::DoneSent => "done_sent",
            Self::AckReceived => "ack_received",
            Self::PollingWinners => "polling_winners",
            Self::WinnersReceived => "winners_received",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Tell the aggregator this agency has finished submitting.
///
/// Any reply frame completes the handshake. Failures are not retried.
///
/// # Errors
/// Returns [`ClientError::DoneFailed`] wrapping the connect or transport
/// failure.
pub async fn send_done<C: Connector>(
    connector: &C,
    settings: &ClientSettings,
) -> Result<(), ClientError> {
    let payload = encode_control(MessageType::Done, settings.agency)?;
    let reply = connector::request(connector, settings.io_timeout, &payload)
        .await
        .map_err(|err| ClientError::DoneFailed(Box::new(err)))?;
    debug!(reply_len = reply.len(), "action: done | result: success");
    Ok(())
}

/// Poll with `GET_WINNERS` until a winners list arrives.
///
/// Connection and transport failures are logged and retried after
/// [`ClientSettings::poll_backoff`], as are `NOT_READY` replies. Cancellation
/// wakes a pending backoff and yields an empty list.
///
/// # Errors
/// Returns [`ClientError::UnexpectedReply`] for a tag other than
/// `NOT_READY`/`WINNERS`, the codec error for a malformed winners list and
/// [`ClientError::PollDeadlineExceeded`] once
/// [`ClientSettings::max_poll`] has elapsed.
pub async fn poll_winners<C: Connector>(
    connector: &C,
    settings: &ClientSettings,
    shutdown: &ShutdownToken,
) -> Result<Vec<String>, ClientError> {
    let payload = encode_control(MessageType::GetWinners, settings.agency)?;
    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        if shutdown.is_cancelled() {
            info!(attempt, "action: consulta_ganadores | result: cancelled");
            return Ok(Vec::new());
        }
        if let Some(limit) = settings.max_poll.filter(|limit| started.elapsed() >= *limit) {
            return Err(ClientError::PollDeadlineExceeded(limit));
        }
        attempt += 1;
        match connector::request(connector, settings.io_timeout, &payload).await {
            Ok(reply) => match peek_type(&reply)? {
                MessageType::WinnersList => return Ok(decode_winners(&reply)?),
                MessageType::NotReady => {
                    debug!(attempt, "action: consulta_ganadores | result: not_ready");
                }
                other => return Err(ClientError::UnexpectedReply(other)),
            },
            Err(err) => {
                warn!(attempt, error = %err, "action: consulta_ganadores | result: fail");
            }
        }
        tokio::select! {
            () = sleep(settings.poll_backoff) => {}
            () = shutdown.cancelled() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::{fixture, rstest};
    use tokio::time::timeout;

    use super::*;
    use crate::{
        codec::{CodecError, encode_winners},
        shutdown,
        test_helpers::{ScriptedConnector, Step},
    };

    #[fixture]
    fn settings() -> ClientSettings { ClientSettings::for_tests(5) }

    fn winners(dnis: &[&str]) -> Step { Step::Reply(encode_winners(dnis).expect("winners")) }

    fn not_ready() -> Step { Step::Reply(vec![MessageType::NotReady.into()]) }

    #[rstest]
    #[tokio::test]
    async fn done_sends_agency_and_accepts_any_reply(settings: ClientSettings) {
        let connector = ScriptedConnector::new([Step::Reply(vec![0x01])]);

        send_done(&connector, &settings).await.expect("done");

        assert_eq!(connector.received(), vec![vec![0x03, 5]]);
    }

    #[rstest]
    #[tokio::test]
    async fn done_failure_is_not_retried(settings: ClientSettings) {
        let connector = ScriptedConnector::new([Step::Hangup, Step::Reply(vec![0x01])]);

        let err = send_done(&connector, &settings).await.expect_err("hangup");

        assert!(matches!(err, ClientError::DoneFailed(_)));
        assert_eq!(connector.connects(), 1);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn polls_until_winners_arrive(mut settings: ClientSettings) {
        settings.poll_backoff = Duration::from_millis(100);
        let started = Instant::now();
        let connector = ScriptedConnector::new([
            not_ready(),
            not_ready(),
            winners(&["30904465", "40111222"]),
        ]);
        let (_trigger, token) = shutdown::channel();

        let list = poll_winners(&connector, &settings, &token)
            .await
            .expect("winners");

        assert_eq!(list, vec!["30904465".to_owned(), "40111222".to_owned()]);
        assert_eq!(connector.connects(), 3);
        assert!(connector.received().iter().all(|f| f == &[0x04, 5]));
        assert!(started.elapsed() >= settings.poll_backoff * 2);
    }

    #[rstest]
    #[tokio::test]
    async fn transport_failures_are_retried(settings: ClientSettings) {
        let connector = ScriptedConnector::new([Step::Refuse, Step::Hangup, winners(&[])]);
        let (_trigger, token) = shutdown::channel();

        let list = poll_winners(&connector, &settings, &token)
            .await
            .expect("winners");

        assert!(list.is_empty());
        assert_eq!(connector.connects(), 3);
    }

    #[rstest]
    #[tokio::test]
    async fn unexpected_tag_is_surfaced(settings: ClientSettings) {
        let connector = ScriptedConnector::new([Step::Reply(vec![0x02, 0x00, 0x00])]);
        let (_trigger, token) = shutdown::channel();

        let err = poll_winners(&connector, &settings, &token)
            .await
            .expect_err("protocol violation");

        assert!(matches!(err, ClientError::UnexpectedReply(MessageType::Batch)));
    }

    #[rstest]
    #[tokio::test]
    async fn malformed_winners_list_is_surfaced(settings: ClientSettings) {
        let connector = ScriptedConnector::new([Step::Reply(vec![0x05, 0x00, 0x02, 0x03, b'a'])]);
        let (_trigger, token) = shutdown::channel();

        let err = poll_winners(&connector, &settings, &token)
            .await
            .expect_err("truncated");

        assert!(matches!(err, ClientError::Codec(CodecError::Truncated)));
    }

    #[rstest]
    #[tokio::test]
    async fn cancellation_interrupts_backoff(mut settings: ClientSettings) {
        settings.poll_backoff = Duration::from_secs(30);
        let (trigger, token) = shutdown::channel();
        let connector = ScriptedConnector::new([not_ready(), not_ready()])
            .on_request(move |_| {
                trigger.trigger();
            });

        let list = timeout(
            Duration::from_secs(5),
            poll_winners(&connector, &settings, &token),
        )
        .await
        .expect("backoff interrupted")
        .expect("clean stop");

        assert!(list.is_empty());
        assert_eq!(connector.connects(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn cancelled_before_polling_sends_nothing(settings: ClientSettings) {
        let connector = ScriptedConnector::new([not_ready()]);
        let (trigger, token) = shutdown::channel();
        trigger.trigger();

        let list = poll_winners(&connector, &settings, &token)
            .await
            .expect("clean stop");

        assert!(list.is_empty());
        assert_eq!(connector.connects(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn bounded_polling_gives_up(mut settings: ClientSettings) {
        settings.max_poll = Some(Duration::from_millis(30));
        let connector = ScriptedConnector::new(std::iter::repeat_with(not_ready).take(1000));
        let (_trigger, token) = shutdown::channel();

        let err = poll_winners(&connector, &settings, &token)
            .await
            .expect_err("deadline");

        assert!(matches!(err, ClientError::PollDeadlineExceeded(_)));
    }

    #[rstest]
    #[case(Phase::Submitting, "submitting")]
    #[case(Phase::PollingWinners, "polling_winners")]
    #[case(Phase::Cancelled, "cancelled")]
    fn phase_display(#[case] phase: Phase, #[case] expected: &str) {
        assert_eq!(phase.to_string(), expected);
    }
}
