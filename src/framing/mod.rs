//! Framed channel over a single duplex byte stream.
//!
//! The lottery protocol mixes three framings on one connection: fixed-width
//! big-endian integers for request codes and agency ids, a `u16` length prefix
//! for batch payloads, and newline-terminated text for server replies. The
//! channel owns the payload cap and never retries; callers decide what a
//! failure means for their phase.

use std::{future::Future, io, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    time::timeout,
};
use tracing::debug;

use crate::{
    errors::ClientError,
    protocol::{MAX_PAYLOAD_SIZE, RequestType},
};

/// Longest reply line accepted from the server, terminator included.
pub const MAX_LINE_LEN: usize = 1024 * 1024; // 1 MiB

async fn io_with_timeout<F, T>(limit: Option<Duration>, operation: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(deadline) => timeout(deadline, operation)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "I/O timeout"))?,
        None => operation.await,
    }
}

/// Reader/writer pair for the lottery wire format.
///
/// Reads are buffered so reply lines can be split from the stream; writes pass
/// straight through and are flushed after each protocol message.
pub struct FramedChannel<S> {
    stream: BufReader<S>,
    timeout: Option<Duration>,
    max_line: usize,
}

impl<S> FramedChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream with no I/O deadline.
    #[must_use = "create a channel"]
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            timeout: None,
            max_line: MAX_LINE_LEN,
        }
    }

    /// Apply a deadline to every subsequent read and write.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the longest reply line accepted.
    #[must_use]
    pub const fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = if max_line == 0 { 1 } else { max_line };
        self
    }

    async fn flush(&mut self) -> Result<(), ClientError> {
        io_with_timeout(self.timeout, self.stream.flush()).await?;
        Ok(())
    }

    /// Write the one-byte request code that opens every exchange.
    ///
    /// # Errors
    /// Returns [`ClientError::Transport`] if the write fails.
    pub async fn write_request(&mut self, request: RequestType) -> Result<(), ClientError> {
        io_with_timeout(self.timeout, self.stream.write_u8(request.into())).await?;
        self.flush().await
    }

    /// Write a big-endian `u16`.
    ///
    /// # Errors
    /// Returns [`ClientError::Transport`] if the write fails.
    pub async fn write_u16(&mut self, value: u16) -> Result<(), ClientError> {
        io_with_timeout(self.timeout, self.stream.write_u16(value)).await?;
        self.flush().await
    }

    /// Write a `u16` length prefix followed by the whole payload.
    ///
    /// Partial writes are retried until every byte is accepted.
    ///
    /// # Errors
    /// Returns [`ClientError::PayloadTooLarge`] before writing anything when
    /// the payload exceeds [`MAX_PAYLOAD_SIZE`], or
    /// [`ClientError::Transport`] if the write fails.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        let too_large = || ClientError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        };
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(too_large());
        }
        let len = u16::try_from(payload.len()).map_err(|_| too_large())?;
        io_with_timeout(self.timeout, self.stream.write_u16(len)).await?;
        io_with_timeout(self.timeout, self.stream.write_all(payload)).await?;
        self.flush().await
    }

    /// Read one line as raw bytes, `\n` terminator included.
    ///
    /// The bytes are returned as received so callers can decide how to treat
    /// a complete line that is not valid UTF-8.
    ///
    /// # Errors
    /// Returns [`ClientError::Transport`] if the stream ends before a
    /// terminator arrives or the line exceeds the configured maximum.
    pub async fn read_raw_line(&mut self) -> Result<Vec<u8>, ClientError> {
        let mut buf = Vec::new();
        let limit = u64::try_from(self.max_line).unwrap_or(u64::MAX);
        let mut bounded = (&mut self.stream).take(limit);
        io_with_timeout(self.timeout, bounded.read_until(b'\n', &mut buf)).await?;
        if buf.last() != Some(&b'\n') {
            let err = if buf.len() >= self.max_line {
                io::Error::new(io::ErrorKind::InvalidData, "reply line too long")
            } else {
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-line")
            };
            return Err(err.into());
        }
        Ok(buf)
    }

    /// Read one line, returning it with its `\n` terminator.
    ///
    /// # Errors
    /// Returns [`ClientError::Transport`] under the same conditions as
    /// [`FramedChannel::read_raw_line`], or when the line is not UTF-8.
    pub async fn read_line(&mut self) -> Result<String, ClientError> {
        let raw = self.read_raw_line().await?;
        String::from_utf8(raw)
            .map_err(|e| ClientError::Transport(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    /// Read a single byte, or `None` if the peer closed the stream first.
    ///
    /// # Errors
    /// Returns [`ClientError::Transport`] on read failures other than EOF.
    pub async fn read_u8(&mut self) -> Result<Option<u8>, ClientError> {
        match io_with_timeout(self.timeout, self.stream.read_u8()).await {
            Ok(byte) => Ok(Some(byte)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Shut down the write half and release the connection.
    ///
    /// Consuming the channel means a connection can only be released once.
    /// Shutdown failures are logged and otherwise ignored since the stream is
    /// dropped either way.
    pub async fn close(mut self) {
        if let Err(e) = io_with_timeout(self.timeout, self.stream.shutdown()).await {
            debug!(error = %e, "connection shutdown failed");
        }
    }
}
