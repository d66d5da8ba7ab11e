//! Meridian world server: authoritative simulation for a 2D zone.
//!
//! Architecture overview:
//! - Network I/O runs on the smol executor: one accept loop, one reader and
//!   one writer task per session, a pool of ingress workers, and detached
//!   tasks for auth replies and the chat bridge.
//! - A dedicated simulation thread owns every piece of world state and runs
//!   the fixed-rate tick loop. Input reaches it only through the command
//!   queue; output leaves only through per-session outbound queues.
//! - Flume channels connect the two sides. There is no shared mutable game
//!   state: the registry map is the single mutex in the system and guards
//!   session handles, not gameplay data.

pub mod auth_service;
pub mod chat_service;
pub mod command;
pub mod config;
pub mod handlers;
pub mod ingress;
pub mod listener;
pub mod packets;
pub mod registry;
pub mod session;
pub mod simulation;
pub mod world;

pub mod prelude {
    pub use anyhow::{anyhow, bail, Context, Result};
    pub use tracing::{debug, error, info, trace, warn};
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use smol::net::TcpListener;

use crate::auth_service::AuthService;
use crate::chat_service::ChatBroker;
use crate::command::CommandQueue;
use crate::config::GameConfig;
use crate::handlers::{ChatHandler, LoginHandler, PacketHandlers};
use crate::ingress::{IngressPool, JobQueue};
use crate::prelude::*;
use crate::registry::SessionRegistry;
use crate::simulation::Simulation;

/// Hard cap on concurrently connected sessions.
pub const MAX_CONCURRENT_CONNECTIONS: usize = 600;

/// Default ingress worker count.
pub const DEFAULT_LOGIC_THREADS: usize = 4;

pub struct ServerOptions {
    /// Address to bind, e.g. `"0.0.0.0:8080"`. Port 0 picks an ephemeral
    /// port, which integration tests rely on.
    pub bind_addr: String,
    pub max_connections: usize,
    pub logic_threads: usize,
    pub game: GameConfig,
    pub auth: Option<Arc<dyn AuthService>>,
    pub chat: Option<Arc<dyn ChatBroker>>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_connections: MAX_CONCURRENT_CONNECTIONS,
            logic_threads: DEFAULT_LOGIC_THREADS,
            game: GameConfig::default(),
            auth: None,
            chat: None,
        }
    }
}

/// A started server. Dropping the handle does not stop the server; call
/// [`ServerHandle::shutdown`].
pub struct ServerHandle {
    local_addr: std::net::SocketAddr,
    running: Arc<AtomicBool>,
    commands: CommandQueue,
    ingress: IngressPool,
    registry: Arc<SessionRegistry>,
    listener_stop: flume::Sender<()>,
    simulation_thread: Option<std::thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Cooperative shutdown: stop the tick loop, wake the workers, close
    /// every session.
    pub fn shutdown(mut self) {
        info!("server shutting down");
        self.running.store(false, Ordering::Relaxed);
        let _ = self.listener_stop.send(());
        self.commands.shutdown();
        self.ingress.stop();
        for session in self.registry.get_all() {
            session.disconnect();
        }
        if let Some(thread) = self.simulation_thread.take() {
            if thread.join().is_err() {
                error!("simulation thread panicked during shutdown");
            }
        }
        info!("server stopped");
    }
}

/// Bind, wire up every component, and start the simulation thread.
pub async fn start_server(options: ServerOptions) -> Result<ServerHandle> {
    let commands = CommandQueue::new();
    let registry = SessionRegistry::new(Some(commands.clone()));

    let (session_events_tx, session_events_rx) = flume::unbounded();
    smol::spawn(registry::run_session_events(Arc::clone(&registry), session_events_rx)).detach();

    let login = LoginHandler::new(options.auth);
    let chat_handler = options.chat.as_ref().map(|broker| ChatHandler::new(Arc::clone(broker)));
    let handlers = Arc::new(PacketHandlers::new(Some(login), chat_handler));

    let jobs = JobQueue::new();
    let ingress = IngressPool::new(jobs.clone(), options.logic_threads.max(1));
    ingress.start(handlers, commands.clone());

    if let Some(broker) = options.chat {
        smol::spawn(handlers::chat::run_chat_bridge(broker, Arc::clone(&registry))).detach();
    }

    let listener = TcpListener::bind(options.bind_addr.as_str())
        .await
        .with_context(|| format!("binding listener on {}", options.bind_addr))?;
    let local_addr = listener.local_addr()?;
    let (listener_stop, listener_stop_rx) = flume::bounded(1);
    smol::spawn(listener::accept_connections(
        listener,
        Arc::clone(&registry),
        session_events_tx,
        jobs.sender(),
        options.max_connections,
        listener_stop_rx,
    ))
    .detach();

    let running = Arc::new(AtomicBool::new(true));
    let simulation = Simulation::new(options.game, Arc::clone(&registry), commands.clone());
    let simulation_running = Arc::clone(&running);
    let simulation_thread = std::thread::Builder::new()
        .name("simulation".to_string())
        .spawn(move || simulation.run(simulation_running))
        .context("spawning simulation thread")?;

    info!("world server listening on {local_addr}");
    Ok(ServerHandle {
        local_addr,
        running,
        commands,
        ingress,
        registry,
        listener_stop,
        simulation_thread: Some(simulation_thread),
    })
}
