//! Handlers for the non-game packet path.
//!
//! The ingress workers dispatch auth and chat traffic here synchronously;
//! everything else they turn into simulation commands. A handler slot left
//! unconfigured (no auth service, no broker) downgrades gracefully instead
//! of taking the packet path down.

pub mod chat;
pub mod login;

use std::sync::Arc;

use meridian_protocol::Packet;

use crate::prelude::*;
use crate::session::Session;

pub use chat::ChatHandler;
pub use login::LoginHandler;

pub struct PacketHandlers {
    login: Option<LoginHandler>,
    chat: Option<ChatHandler>,
}

impl PacketHandlers {
    pub fn new(login: Option<LoginHandler>, chat: Option<ChatHandler>) -> Self {
        Self { login, chat }
    }

    pub async fn dispatch(&self, session: Arc<Session>, packet: Packet) {
        match packet {
            Packet::C_Login {
                session_ticket,
                command_id,
            } => match &self.login {
                Some(handler) => handler.handle(session, session_ticket, command_id).await,
                None => warn!("session {}: C_Login with no login handler; dropped", session.id()),
            },
            Packet::C_Chat { message } => match &self.chat {
                Some(handler) => handler.handle(session, message).await,
                None => debug!("session {}: C_Chat with no chat handler; dropped", session.id()),
            },
            // Server-originated ids arriving from a client land here.
            other => warn!(
                "session {}: no handler registered for {:?}; dropped",
                session.id(),
                other.id()
            ),
        }
    }
}
