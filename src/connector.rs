//! Connection factory used by every protocol step.
//!
//! The [`Connector`] trait hides how a stream to the aggregator is opened so
//! the same submission and polling logic runs over TCP in production and over
//! in-memory pipes in tests.

use std::{io, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

use crate::{error::ClientError, frame::FramedChannel};

/// Default deadline for establishing a connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens reliable, ordered byte streams to the aggregator.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Stream type produced by [`connect`](Self::connect).
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a new stream.
    ///
    /// # Errors
    /// Returns the I/O error raised while connecting.
    async fn connect(&self) -> io::Result<Self::Stream>;
}

/// TCP connector for a fixed `host:port` address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create a connector for `address` with the default connect timeout.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Override the connect timeout.
    #[must_use]
    pub const fn with_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Address this connector dials.
    #[must_use]
    pub fn address(&self) -> &str { &self.address }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", self.address),
                )
            })??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Open a framed channel through `connector`.
///
/// # Errors
/// Returns [`ClientError::Connect`] when the stream cannot be opened.
pub async fn open<C: Connector>(
    connector: &C,
    io_timeout: Duration,
) -> Result<FramedChannel<C::Stream>, ClientError> {
    let stream = connector.connect().await.map_err(ClientError::Connect)?;
    Ok(FramedChannel::new(stream).with_timeout(io_timeout))
}

/// Close a channel, logging rather than propagating shutdown failures.
pub async fn close<S>(channel: FramedChannel<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(err) = channel.close().await {
        debug!(error = %err, "action: close_connection | result: fail");
    } else {
        debug!("action: close_connection | result: success");
    }
}

/// Send one payload on a fresh connection and return the single reply.
///
/// The connection is closed before returning, whatever the outcome.
///
/// # Errors
/// Returns [`ClientError::Connect`] or the [`ClientError::Frame`] error raised
/// while sending or receiving.
pub async fn request<C: Connector>(
    connector: &C,
    io_timeout: Duration,
    payload: &[u8],
) -> Result<Vec<u8>, ClientError> {
    let mut channel = open(connector, io_timeout).await?;
    let result = exchange(&mut channel, payload).await;
    close(channel).await;
    result
}

async fn exchange<S>(channel: &mut FramedChannel<S>, payload: &[u8]) -> Result<Vec<u8>, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel.send_message(payload).await?;
    Ok(channel.recv_message().await?)
}
