//! Simulation commands and the queue that feeds them to the tick loop.
//!
//! Everything that mutates world state arrives here: ingress workers push
//! translated client packets, the registry pushes disconnects. The
//! simulation thread is the only consumer, draining with `try_pop` during
//! its command phase.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::prelude::*;
use crate::session::SessionId;

/// Milliseconds since the unix epoch; the timestamp stamped onto commands
/// and snapshots.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandPayload {
    PlayerInput {
        player_id: u64,
        input_flags: u8,
        sequence_number: u32,
    },
    EnterZone {
        player_id: u64,
        zone_id: i32,
        session_id: SessionId,
    },
    /// Produced by the registry when an authenticated session dies. The
    /// session is already gone, so handling must not assume one exists.
    PlayerDisconnect {
        player_id: u64,
    },
    /// Sentinel returned by `pop` once the queue has shut down.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub command_id: i64,
    pub sender_session_id: SessionId,
    pub timestamp: u64,
    pub payload: CommandPayload,
}

impl Command {
    pub fn new(command_id: i64, sender_session_id: SessionId, payload: CommandPayload) -> Self {
        Self {
            command_id,
            sender_session_id,
            timestamp: current_timestamp_ms(),
            payload,
        }
    }

    fn shutdown_sentinel() -> Self {
        Self {
            command_id: 0,
            sender_session_id: 0,
            timestamp: current_timestamp_ms(),
            payload: CommandPayload::Shutdown,
        }
    }
}

/// FIFO command queue between the network side and the simulation thread.
/// Cloning shares the same underlying channel.
#[derive(Clone)]
pub struct CommandQueue {
    tx: flume::Sender<Command>,
    rx: flume::Receiver<Command>,
    shutting_down: Arc<AtomicBool>,
}

impl CommandQueue {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueue a command. Producers racing a shutdown are tolerated: their
    /// commands are dropped with a warning rather than an error.
    pub fn push(&self, command: Command) {
        if self.shutting_down.load(Ordering::Acquire) {
            warn!("command queue shutting down; dropping {:?}", command.payload);
            return;
        }
        let _ = self.tx.send(command);
    }

    /// Non-blocking drain step used by the simulation's command phase.
    pub fn try_pop(&self) -> Option<Command> {
        self.rx.try_recv().ok()
    }

    /// Blocking pop. After `shutdown` this returns the shutdown sentinel
    /// once the backlog is drained instead of blocking forever.
    pub fn pop(&self) -> Command {
        loop {
            if let Ok(command) = self.rx.try_recv() {
                return command;
            }
            if self.shutting_down.load(Ordering::Acquire) {
                return Command::shutdown_sentinel();
            }
            match self.rx.recv() {
                Ok(command) => return command,
                Err(_) => return Command::shutdown_sentinel(),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Wake blocked consumers and make subsequent pushes no-ops. The
    /// backlog stays poppable so in-flight commands are not lost.
    pub fn shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Command::shutdown_sentinel());
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
