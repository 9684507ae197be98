//! Length-prefixed framing over a byte stream.
//!
//! Every message travels as `[length:u16][payload]` with the payload capped
//! at [`MAX_MESSAGE_SIZE`]. [`FrameCodec`] implements Tokio's [`Decoder`] and
//! [`Encoder`] traits so [`FramedChannel`] can drive any
//! `AsyncRead + AsyncWrite` stream through [`tokio_util::codec::Framed`],
//! which already loops over short reads and short writes.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio::net::TcpStream;
//! use agency_client::frame::FramedChannel;
//!
//! async fn ping(stream: TcpStream) -> Result<Vec<u8>, agency_client::frame::FrameError> {
//!     let mut channel = FramedChannel::new(stream);
//!     channel.send_message(&[0x04, 0x01]).await?;
//!     channel.recv_message().await
//! }
//! ```

#![expect(clippy::big_endian_bytes, reason = "network protocol uses big-endian")]

use std::{io, time::Duration};

use bytes::{Buf, BufMut, BytesMut};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    time::timeout,
};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::codec::MAX_MESSAGE_SIZE;

/// Width of the big-endian length prefix.
pub const LENGTH_PREFIX_LEN: usize = 2;
/// Default deadline applied to each send, receive and close.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while moving frames over a stream.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The payload, or a declared frame length, exceeds [`MAX_MESSAGE_SIZE`].
    #[error("message of {0} bytes exceeds the {MAX_MESSAGE_SIZE}-byte limit")]
    MessageTooLarge(usize),
    /// The peer closed the stream before a frame was complete.
    #[error("connection closed")]
    ConnectionClosed,
    /// The I/O deadline elapsed.
    #[error("I/O timeout")]
    Timeout,
    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WriteZero
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => Self::ConnectionClosed,
            _ => Self::Io(err),
        }
    }
}

/// Tokio codec for `[length:u16][payload]` frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self { Self }
}

impl Decoder for FrameCodec {
    type Error = FrameError;
    type Item = BytesMut;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(&[hi, lo]) = src.get(..LENGTH_PREFIX_LEN) else {
            return Ok(None);
        };
        let len = usize::from(u16::from_be_bytes([hi, lo]));
        if len > MAX_MESSAGE_SIZE {
            return Err(FrameError::MessageTooLarge(len));
        }
        let frame_len = LENGTH_PREFIX_LEN + len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }
        src.advance(LENGTH_PREFIX_LEN);
        Ok(Some(src.split_to(len)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_MESSAGE_SIZE {
            return Err(FrameError::MessageTooLarge(item.len()));
        }
        let len = u16::try_from(item.len()).map_err(|_| FrameError::MessageTooLarge(item.len()))?;
        dst.reserve(LENGTH_PREFIX_LEN + item.len());
        dst.put_u16(len);
        dst.extend_from_slice(item);
        Ok(())
    }
}

/// Message channel over a byte stream.
///
/// Owns the stream; dropping the channel closes it. Call
/// [`close`](Self::close) to shut down the write half first.
pub struct FramedChannel<S> {
    inner: Framed<S, FrameCodec>,
    timeout: Duration,
}

impl<S> FramedChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `stream` with the default I/O timeout.
    #[must_use]
    pub fn new(stream: S) -> Self {
        Self {
            inner: Framed::new(stream, FrameCodec::new()),
            timeout: IO_TIMEOUT,
        }
    }

    /// Override the deadline applied to each operation.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one payload as a single frame.
    ///
    /// Oversized payloads are rejected before any byte reaches the stream.
    ///
    /// # Errors
    /// Returns [`FrameError::MessageTooLarge`], [`FrameError::ConnectionClosed`]
    /// when the stream stops accepting bytes, [`FrameError::Timeout`] or
    /// [`FrameError::Io`].
    pub async fn send_message(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(FrameError::MessageTooLarge(payload.len()));
        }
        timeout(self.timeout, self.inner.send(payload))
            .await
            .map_err(|_| FrameError::Timeout)?
    }

    /// Receive exactly one frame and return its payload.
    ///
    /// # Errors
    /// Returns [`FrameError::MessageTooLarge`] for an oversized declared
    /// length, [`FrameError::ConnectionClosed`] when the stream ends first,
    /// [`FrameError::Timeout`] or [`FrameError::Io`].
    pub async fn recv_message(&mut self) -> Result<Vec<u8>, FrameError> {
        match timeout(self.timeout, self.inner.next())
            .await
            .map_err(|_| FrameError::Timeout)?
        {
            Some(frame) => Ok(frame?.to_vec()),
            None => Err(FrameError::ConnectionClosed),
        }
    }

    /// Shut down the write half of the stream.
    ///
    /// # Errors
    /// Returns [`FrameError::Timeout`] or the I/O error reported by the stream.
    pub async fn close(mut self) -> Result<(), FrameError> {
        timeout(self.timeout, self.inner.get_mut().shutdown())
            .await
            .map_err(|_| FrameError::Timeout)?
            .map_err(FrameError::from)
    }

    /// Return the underlying stream, discarding buffered bytes.
    #[must_use]
    pub fn into_inner(self) -> S { self.inner.into_inner() }
}
