//! `C_Chat` handling and the broker-to-sessions bridge.

use std::sync::Arc;

use futures::StreamExt;

use crate::chat_service::{ChatBroker, CHAT_CHANNEL};
use crate::packets;
use crate::prelude::*;
use crate::registry::SessionRegistry;
use crate::session::Session;

pub struct ChatHandler {
    broker: Arc<dyn ChatBroker>,
}

impl ChatHandler {
    pub fn new(broker: Arc<dyn ChatBroker>) -> Self {
        Self { broker }
    }

    /// Publish `"{playerId}|{text}"` on the fixed chat channel. Delivery
    /// back to the sender happens through the subscriber like everyone
    /// else's messages.
    pub async fn handle(&self, session: Arc<Session>, message: String) {
        let player_id = session.player_id();
        if player_id == 0 {
            debug!("session {}: chat before authentication; dropped", session.id());
            return;
        }
        let payload = format!("{player_id}|{message}");
        if let Err(e) = self.broker.publish(CHAT_CHANNEL, payload).await {
            error!("session {}: chat publish failed: {e:#}", session.id());
        }
    }
}

/// Subscriber side: consume the broker stream for the lifetime of the
/// server and fan each message out to every registered session.
pub async fn run_chat_bridge(broker: Arc<dyn ChatBroker>, registry: Arc<SessionRegistry>) {
    let mut messages = match broker.subscribe(CHAT_CHANNEL).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("chat bridge failed to subscribe; chat is disabled: {e:#}");
            return;
        }
    };
    info!("chat bridge subscribed to {CHAT_CHANNEL}");

    while let Some(message) = messages.next().await {
        let Some((player_id, text)) = parse_chat_payload(&message) else {
            warn!("malformed chat payload {message:?}; dropped");
            continue;
        };
        let frame = match packets::chat_broadcast(player_id, text.to_string()) {
            Ok(frame) => frame,
            Err(e) => {
                error!("failed to build chat frame: {e:#}");
                continue;
            }
        };
        let sessions = registry.get_all();
        debug!("chat from player {} fanned out to {} sessions", player_id, sessions.len());
        for session in sessions {
            session.send(frame.clone());
        }
    }
    info!("chat bridge stream ended");
}

fn parse_chat_payload(payload: &str) -> Option<(u64, &str)> {
    let (id, text) = payload.split_once('|')?;
    Some((id.parse().ok()?, text))
}
