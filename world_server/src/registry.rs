//! Session registry: the server's single source of truth for live sessions.
//!
//! A plain mutex-guarded map is enough here; every operation is a short
//! lookup or insert and the simulation only touches it once per outbound
//! send. Disconnection flows through the registry exactly once: the session
//! emits a `SessionEvent`, the registry task removes the entry, and removal
//! converts an authenticated session's death into a `PlayerDisconnect`
//! command so the simulation thread stays the sole mutator of world state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::command::{Command, CommandPayload, CommandQueue};
use crate::prelude::*;
use crate::session::{Session, SessionEvent, SessionId};

pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    commands: Option<CommandQueue>,
}

impl SessionRegistry {
    pub fn new(commands: Option<CommandQueue>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            commands,
        })
    }

    pub fn add(&self, session: Arc<Session>) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(session.id(), session);
        info!("session registered; {} active", sessions.len());
    }

    /// Remove a session. If it had authenticated, its player is told to the
    /// simulation via a `PlayerDisconnect` command.
    pub fn remove(&self, session_id: SessionId) -> Option<Arc<Session>> {
        let removed = {
            let mut sessions = self.sessions.lock().unwrap();
            let removed = sessions.remove(&session_id);
            if removed.is_some() {
                info!("session {} removed; {} active", session_id, sessions.len());
            }
            removed
        };
        if let Some(session) = &removed {
            let player_id = session.player_id();
            if player_id != 0 {
                if let Some(commands) = &self.commands {
                    commands.push(Command::new(
                        0,
                        session_id,
                        CommandPayload::PlayerDisconnect { player_id },
                    ));
                }
            }
        }
        removed
    }

    pub fn get(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(&session_id).cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

/// Registry-side consumer of session lifecycle events. Runs detached for
/// the life of the server.
pub async fn run_session_events(registry: Arc<SessionRegistry>, events: flume::Receiver<SessionEvent>) {
    while let Ok(event) = events.recv_async().await {
        match event {
            SessionEvent::Disconnected { session_id } => {
                registry.remove(session_id);
            }
        }
    }
}
