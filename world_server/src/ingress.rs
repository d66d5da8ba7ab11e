//! Ingress worker pool: raw frame payloads in, handler dispatch or
//! simulation commands out.
//!
//! Workers block on the job queue, decode each payload (decoding is the
//! payload verifier; undecodable bytes terminate the session), then
//! classify: auth/chat traffic is dispatched straight to its handler,
//! in-game packets become commands on the simulation queue. Each worker
//! exits on its own shutdown job, one of which is pushed per worker.

use std::sync::Arc;

use meridian_protocol::{decode_packet, Packet};

use crate::command::{Command, CommandPayload, CommandQueue};
use crate::handlers::PacketHandlers;
use crate::prelude::*;
use crate::session::Session;

/// Unit of work handed from a session reader to the pool.
pub enum Job {
    Packet { session: Arc<Session>, payload: Vec<u8> },
    Shutdown,
}

/// MPMC queue feeding the workers. Cloning shares the channel.
#[derive(Clone)]
pub struct JobQueue {
    tx: flume::Sender<Job>,
    rx: flume::Receiver<Job>,
}

impl JobQueue {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> flume::Sender<Job> {
        self.tx.clone()
    }

    pub fn push(&self, job: Job) {
        let _ = self.tx.send(job);
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub struct IngressPool {
    jobs: JobQueue,
    workers: usize,
}

impl IngressPool {
    pub fn new(jobs: JobQueue, workers: usize) -> Self {
        Self { jobs, workers }
    }

    /// Spawn the worker tasks onto the executor.
    pub fn start(&self, handlers: Arc<PacketHandlers>, commands: CommandQueue) {
        for worker in 0..self.workers {
            let rx = self.jobs.rx.clone();
            let handlers = Arc::clone(&handlers);
            let commands = commands.clone();
            smol::spawn(async move {
                info!("ingress worker {} started", worker + 1);
                while let Ok(job) = rx.recv_async().await {
                    match job {
                        Job::Shutdown => {
                            info!("ingress worker {} stopping", worker + 1);
                            break;
                        }
                        Job::Packet { session, payload } => {
                            process_packet(session, payload, &handlers, &commands).await;
                        }
                    }
                }
            })
            .detach();
        }
    }

    /// Push one shutdown job per worker so every loop wakes and exits.
    pub fn stop(&self) {
        for _ in 0..self.workers {
            self.jobs.push(Job::Shutdown);
        }
    }
}

async fn process_packet(
    session: Arc<Session>,
    payload: Vec<u8>,
    handlers: &PacketHandlers,
    commands: &CommandQueue,
) {
    if payload.is_empty() {
        error!("session {}: empty packet payload", session.id());
        return;
    }

    let packet = match decode_packet(&payload) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(
                "session {}: undecodable payload ({} bytes): {}; terminating",
                session.id(),
                payload.len(),
                e
            );
            session.disconnect();
            return;
        }
    };

    if packet.is_non_game() {
        handlers.dispatch(session, packet).await;
        return;
    }

    let player_id = session.player_id();
    if player_id == 0 {
        debug!(
            "session {}: {:?} before authentication; dropped",
            session.id(),
            packet.id()
        );
        return;
    }

    match packet {
        Packet::C_PlayerInput {
            input_flags,
            sequence_number,
            command_id,
            ..
        } => {
            commands.push(Command::new(
                command_id,
                session.id(),
                CommandPayload::PlayerInput {
                    player_id,
                    input_flags,
                    sequence_number,
                },
            ));
        }
        Packet::C_EnterZone { zone_id } => {
            commands.push(Command::new(
                0,
                session.id(),
                CommandPayload::EnterZone {
                    player_id,
                    zone_id,
                    session_id: session.id(),
                },
            ));
        }
        other => {
            warn!(
                "session {}: no command mapping for {:?}; dropped",
                session.id(),
                other.id()
            );
        }
    }
}
