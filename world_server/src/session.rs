//! Per-socket session handling.
//!
//! - Each session owns one `TcpStream` and runs two detached tasks: a reader
//!   that turns the byte stream into framed payloads for the ingress pool,
//!   and a writer that drains the session's outbound queue.
//! - The outbound queue is a flume channel with many producers (simulation
//!   thread, handler tasks, chat bridge) and the writer task as its only
//!   consumer; `recv_async` doubles as the writer's wake signal, so there is
//!   no separate condition variable.
//! - Teardown is message-passing all the way: `disconnect` flips the
//!   connected flag exactly once, pushes a shutdown sentinel for the writer,
//!   closes the socket (which unblocks the reader), and emits a single
//!   `SessionEvent::Disconnected` that the registry task consumes. Sessions
//!   never reach into the registry themselves.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use smol::io::{AsyncReadExt, AsyncWriteExt};
use smol::net::{Shutdown, TcpStream};

use meridian_protocol::frame;

use crate::ingress::Job;
use crate::prelude::*;

pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle notifications consumed by the registry task.
#[derive(Debug)]
pub enum SessionEvent {
    Disconnected { session_id: SessionId },
}

/// Entries in the per-session outbound queue. A batch is flushed as a single
/// socket write so one tick's snapshots cost one syscall.
enum Outbound {
    Frame(Vec<u8>),
    Batch(Vec<Vec<u8>>),
    Shutdown,
}

pub struct Session {
    id: SessionId,
    remote_addr: SocketAddr,
    stream: TcpStream,
    connected: AtomicBool,
    /// 0 until authentication succeeds; set at most once.
    player_id: AtomicU64,
    outbound_tx: flume::Sender<Outbound>,
    outbound_rx: flume::Receiver<Outbound>,
    events: flume::Sender<SessionEvent>,
    jobs: flume::Sender<Job>,
}

impl Session {
    pub fn new(
        stream: TcpStream,
        remote_addr: SocketAddr,
        events: flume::Sender<SessionEvent>,
        jobs: flume::Sender<Job>,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = flume::unbounded();
        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            remote_addr,
            stream,
            connected: AtomicBool::new(true),
            player_id: AtomicU64::new(0),
            outbound_tx,
            outbound_rx,
            events,
            jobs,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn player_id(&self) -> u64 {
        self.player_id.load(Ordering::Acquire)
    }

    /// Attach the authenticated player identity. First caller wins; the id
    /// is never cleared for the lifetime of the session.
    pub fn set_player_id(&self, player_id: u64) {
        if self
            .player_id
            .compare_exchange(0, player_id, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(
                "session {}: ignoring player id {} (already bound to {})",
                self.id,
                player_id,
                self.player_id()
            );
        }
    }

    /// Spawn the reader and writer tasks for this session.
    pub fn start(self: &Arc<Self>) {
        smol::spawn(Arc::clone(self).read_loop()).detach();
        smol::spawn(Arc::clone(self).write_loop()).detach();
    }

    /// Enqueue one already-encoded frame body. Callable from any thread.
    /// After disconnect the data is dropped silently.
    pub fn send(&self, body: Vec<u8>) {
        if !self.is_connected() {
            return;
        }
        let _ = self.outbound_tx.send(Outbound::Frame(body));
    }

    /// Enqueue a tick's worth of frame bodies to be flushed as one write.
    pub fn send_batch(&self, bodies: Vec<Vec<u8>>) {
        if bodies.is_empty() || !self.is_connected() {
            return;
        }
        let _ = self.outbound_tx.send(Outbound::Batch(bodies));
    }

    /// Idempotent teardown. Wakes the writer, closes the socket so the
    /// reader unblocks, and emits the disconnect event exactly once.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.outbound_tx.send(Outbound::Shutdown);
            if let Err(e) = self.stream.shutdown(Shutdown::Both) {
                debug!("session {}: socket shutdown: {}", self.id, e);
            }
            let _ = self.events.send(SessionEvent::Disconnected { session_id: self.id });
        }
    }

    // TODO: per-operation read/write deadlines; a stalled client currently
    // holds its session until the socket errors out.
    async fn read_loop(self: Arc<Self>) {
        let mut stream = self.stream.clone();
        let mut header = [0u8; frame::HEADER_SIZE];
        loop {
            if let Err(e) = stream.read_exact(&mut header).await {
                self.log_io_error("read header", &e);
                break;
            }
            let len = match frame::parse_header(header) {
                Ok(len) => len,
                Err(e) => {
                    warn!("session {}: {}; terminating", self.id, e);
                    break;
                }
            };
            let mut body = vec![0u8; len];
            if let Err(e) = stream.read_exact(&mut body).await {
                self.log_io_error("read body", &e);
                break;
            }
            let job = Job::Packet {
                session: Arc::clone(&self),
                payload: body,
            };
            if self.jobs.send_async(job).await.is_err() {
                // Ingress queue is gone; the server is shutting down.
                break;
            }
        }
        self.disconnect();
    }

    async fn write_loop(self: Arc<Self>) {
        let mut stream = self.stream.clone();
        loop {
            let outbound = match self.outbound_rx.recv_async().await {
                Ok(outbound) => outbound,
                Err(_) => break,
            };
            let buf = match outbound {
                Outbound::Frame(body) => match frame::encode(&body) {
                    Ok(buf) => buf,
                    Err(e) => {
                        error!("session {}: dropping outbound frame: {}", self.id, e);
                        continue;
                    }
                },
                Outbound::Batch(bodies) => match frame::encode_batch(&bodies) {
                    Ok(buf) => buf,
                    Err(e) => {
                        error!("session {}: dropping outbound batch: {}", self.id, e);
                        continue;
                    }
                },
                Outbound::Shutdown => break,
            };
            if let Err(e) = stream.write_all(&buf).await {
                self.log_io_error("write", &e);
                break;
            }
        }
        // Clear whatever the producers managed to enqueue before they saw
        // the connected flag drop.
        while self.outbound_rx.try_recv().is_ok() {}
        self.disconnect();
    }

    /// Transient peer-side failures are expected churn and logged at INFO;
    /// a dead local descriptor is WARN; anything else is a real error.
    fn log_io_error(&self, operation: &str, e: &std::io::Error) {
        use std::io::ErrorKind::*;
        match e.kind() {
            UnexpectedEof | ConnectionReset | ConnectionAborted | Interrupted => {
                info!("session {}: {} ended: {}", self.id, operation, e)
            }
            NotConnected | BrokenPipe => warn!("session {}: {} on dead socket: {}", self.id, operation, e),
            _ => error!("session {}: {} failed: {}", self.id, operation, e),
        }
    }
}
