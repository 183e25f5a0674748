//! In-memory transport helpers for exercising the client phases.
//!
//! [`ScriptedConnector`] hands out one [`DuplexStream`] per `connect` call.
//! Each stream's server half is driven by a script spawned when the stream is
//! queued, so tests describe the server's behaviour per connection.

use std::{
    collections::VecDeque,
    future::Future,
    io,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex},
    task::JoinHandle,
    time::Instant,
};

use crate::connector::Connector;

/// Buffer size of each in-memory pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Connector that replays pre-scripted in-memory connections in order.
///
/// Once the queue is empty further connects fail with `ConnectionRefused`.
#[derive(Default)]
pub struct ScriptedConnector {
    pending: Mutex<VecDeque<DuplexStream>>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    /// Create a connector with no scripted connections.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Queue a connection whose server half is driven by `server`.
    ///
    /// Must be called from within a Tokio runtime.
    #[expect(
        clippy::must_use_candidate,
        reason = "callers may ignore the server task handle"
    )]
    pub fn script<F, Fut, T>(&self, server: F) -> JoinHandle<T>
    where
        F: FnOnce(DuplexStream) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (client, server_half) = duplex(PIPE_CAPACITY);
        self.queue().push_back(client);
        tokio::spawn(server(server_half))
    }

    /// Number of connections handed out so far.
    #[must_use]
    pub fn connects(&self) -> usize { self.connects.load(Ordering::SeqCst) }

    fn queue(&self) -> MutexGuard<'_, VecDeque<DuplexStream>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> io::Result<DuplexStream> {
        let next = self.queue().pop_front();
        match next {
            Some(stream) => {
                self.connects.fetch_add(1, Ordering::SeqCst);
                Ok(stream)
            }
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "no scripted connection left",
            )),
        }
    }
}

/// Read the one-byte request code sent by the client.
///
/// # Errors
/// Returns any read error, including EOF before the byte arrives.
pub async fn read_request_code(stream: &mut DuplexStream) -> io::Result<u8> {
    stream.read_u8().await
}

/// Read one length-prefixed batch payload, or `None` if the client closed the
/// connection at a frame boundary.
///
/// # Errors
/// Returns any read error other than a clean close before the length prefix.
pub async fn read_batch(stream: &mut DuplexStream) -> io::Result<Option<Vec<u8>>> {
    let len = match stream.read_u16().await {
        Ok(len) => len,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut payload = vec![0u8; usize::from(len)];
    stream.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Serve a bet submission, answering each batch with the next entry of
/// `acks` (`OK\n` once `acks` runs out) and returning the decoded batches.
///
/// # Errors
/// Returns any read or write error, or `InvalidData` for a wrong request code
/// or a non-UTF-8 payload.
pub async fn serve_submission(
    mut stream: DuplexStream,
    acks: Vec<&'static str>,
) -> io::Result<Vec<String>> {
    let code = read_request_code(&mut stream).await?;
    if code != crate::protocol::SUBMIT_BETS {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected request code {code}"),
        ));
    }
    let mut replies = acks.into_iter();
    let mut batches = Vec::new();
    while let Some(payload) = read_batch(&mut stream).await? {
        let text = String::from_utf8(payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        batches.push(text);
        let ack = replies.next().unwrap_or(crate::protocol::ACK_OK);
        stream.write_all(ack.as_bytes()).await?;
    }
    Ok(batches)
}

/// Serve one winners query attempt.
///
/// Sends `readiness`; when it is the ready code, reads the agency id, replies
/// with `winners` followed by a newline and returns the agency id received.
/// Any other code is followed by waiting for the client to close its end.
///
/// # Errors
/// Returns any read or write error, or `InvalidData` for a wrong request code.
pub async fn serve_winners_query(
    mut stream: DuplexStream,
    readiness: u8,
    winners: &'static str,
) -> io::Result<Option<u16>> {
    let code = read_request_code(&mut stream).await?;
    if code != crate::protocol::QUERY_WINNERS {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected request code {code}"),
        ));
    }
    stream.write_u8(readiness).await?;
    if readiness != crate::protocol::READY {
        let mut trailing = Vec::new();
        stream.read_to_end(&mut trailing).await?;
        return Ok(None);
    }
    let agency = stream.read_u16().await?;
    stream.write_all(winners.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    Ok(Some(agency))
}

/// Answer one winners query with "not ready" and report when the client
/// released the connection.
///
/// # Errors
/// Returns any read or write error, or `InvalidData` for a wrong request code.
pub async fn serve_not_ready(stream: DuplexStream) -> io::Result<Instant> {
    serve_winners_query(stream, 0, "").await?;
    Ok(Instant::now())
}
