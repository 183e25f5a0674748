//! In-process lottery server used by integration suites.
//!
//! The server speaks the wire protocol from the server side and handles one
//! connection at a time. It stores every acknowledged bet, marks an agency as
//! finished when its submission connection ends, and performs the draw once
//! the expected number of agencies has finished. Winners are the bets whose
//! number equals [`WINNING_NUMBER`].

use std::{
    collections::BTreeSet,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use betwire::{
    bet::Bet,
    protocol::{ACK_OK, QUERY_WINNERS, READY, SUBMIT_BETS},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lottery number that wins the draw.
pub const WINNING_NUMBER: &str = "7574";

/// Reply sent instead of `OK` for a rejected batch.
pub const REJECT_REPLY: &str = "ERROR\n";

/// Behaviour knobs for [`FakeServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    /// Number of agencies that must finish submitting before the draw.
    pub agencies: usize,
    /// One-based index of a batch to answer with [`REJECT_REPLY`].
    pub reject_batch: Option<usize>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            agencies: 1,
            reject_batch: None,
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    bets: Vec<Bet>,
    batch_sizes: Vec<usize>,
    finished: BTreeSet<String>,
    queries: usize,
    draw_done: bool,
}

#[derive(Clone)]
struct Shared {
    ledger: Arc<Mutex<Ledger>>,
    options: ServerOptions,
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running fake server; stop it with [`FakeServer::stop`].
pub struct FakeServer {
    addr: SocketAddr,
    shared: Shared,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl FakeServer {
    /// Bind to an ephemeral localhost port and start serving.
    ///
    /// # Errors
    /// Returns any error raised while binding the listener.
    pub async fn start(options: ServerOptions) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shared = Shared {
            ledger: Arc::new(Mutex::new(Ledger::default())),
            options,
        };
        let shutdown = CancellationToken::new();
        let serving = shared.clone();
        let stop = shutdown.clone();
        let task = tokio::spawn(async move { accept_loop(&listener, &serving, &stop).await });
        info!(%addr, "fake lottery server listening");
        Ok(Self {
            addr,
            shared,
            shutdown,
            task,
        })
    }

    /// Address clients should connect to.
    #[must_use]
    pub fn address(&self) -> String { self.addr.to_string() }

    /// Every bet stored so far, in arrival order.
    #[must_use]
    pub fn bets(&self) -> Vec<Bet> { self.shared.ledger().bets.clone() }

    /// Number of bets in each acknowledged batch, in arrival order.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> { self.shared.ledger().batch_sizes.clone() }

    /// Number of winners queries received.
    #[must_use]
    pub fn queries(&self) -> usize { self.shared.ledger().queries }

    /// Whether the draw has been performed.
    #[must_use]
    pub fn draw_done(&self) -> bool { self.shared.ledger().draw_done }

    /// Stop accepting connections and wait for the server task to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "fake server task failed");
        }
    }
}

async fn accept_loop(listener: &TcpListener, shared: &Shared, shutdown: &CancellationToken) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            res = listener.accept() => match res {
                Ok((socket, peer)) => {
                    if let Err(e) = handle_connection(socket, shared).await {
                        warn!(%peer, error = %e, "connection error");
                    }
                }
                Err(e) => warn!(error = %e, "accept error"),
            },
        }
    }
}

async fn handle_connection(mut socket: TcpStream, shared: &Shared) -> io::Result<()> {
    let code = match socket.read_u8().await {
        Ok(code) => code,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
        Err(e) => return Err(e),
    };
    match code {
        SUBMIT_BETS => handle_bets(&mut socket, shared).await,
        QUERY_WINNERS => handle_winners(&mut socket, shared).await,
        other => {
            debug!(code = other, "ignoring unknown request");
            Ok(())
        }
    }
}

fn decode_batch(payload: Vec<u8>) -> io::Result<Vec<Bet>> {
    let text = String::from_utf8(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    text.lines()
        .enumerate()
        .map(|(idx, line)| {
            Bet::from_wire_line(line, idx + 1)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
        })
        .collect()
}

async fn handle_bets(socket: &mut TcpStream, shared: &Shared) -> io::Result<()> {
    let mut agency = None;
    let mut received = 0usize;
    loop {
        let len = match socket.read_u16().await {
            Ok(0) => break,
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        let mut payload = vec![0u8; usize::from(len)];
        socket.read_exact(&mut payload).await?;
        received += 1;
        if shared.options.reject_batch == Some(received) {
            socket.write_all(REJECT_REPLY.as_bytes()).await?;
            return Ok(());
        }
        let bets = decode_batch(payload)?;
        if let Some(first) = bets.first() {
            agency.get_or_insert_with(|| first.agency().to_owned());
        }
        {
            let mut ledger = shared.ledger();
            ledger.batch_sizes.push(bets.len());
            ledger.bets.extend(bets);
        }
        socket.write_all(ACK_OK.as_bytes()).await?;
    }
    if let Some(finished) = agency {
        let mut ledger = shared.ledger();
        info!(agency = %finished, batches = received, "bets stored");
        ledger.finished.insert(finished);
        if !ledger.draw_done && ledger.finished.len() >= shared.options.agencies {
            ledger.draw_done = true;
            info!("lottery draw done");
        }
    }
    Ok(())
}

async fn handle_winners(socket: &mut TcpStream, shared: &Shared) -> io::Result<()> {
    let ready = {
        let mut ledger = shared.ledger();
        ledger.queries += 1;
        ledger.draw_done
    };
    socket.write_u8(if ready { READY } else { 0 }).await?;
    if !ready {
        return Ok(());
    }
    let agency = socket.read_u16().await?.to_string();
    let winners: Vec<String> = shared
        .ledger()
        .bets
        .iter()
        .filter(|bet| bet.agency() == agency && bet.number() == WINNING_NUMBER)
        .map(|bet| bet.document().to_owned())
        .collect();
    let mut reply = winners.join(",");
    reply.push('\n');
    socket.write_all(reply.as_bytes()).await
}
