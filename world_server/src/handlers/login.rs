//! `C_Login` handling: asynchronous ticket verification.
//!
//! The verification round-trip runs in its own detached task on the I/O
//! executor, so a slow auth server never stalls an ingress worker. The
//! reply goes through the session's outbound queue like every other write,
//! which keeps per-session write ordering intact.

use std::sync::Arc;

use meridian_protocol::{PlayerInfo, Vec2};

use crate::auth_service::{AuthService, ERR_UNAVAILABLE};
use crate::packets;
use crate::prelude::*;
use crate::session::Session;

pub struct LoginHandler {
    auth: Option<Arc<dyn AuthService>>,
}

impl LoginHandler {
    pub fn new(auth: Option<Arc<dyn AuthService>>) -> Self {
        Self { auth }
    }

    pub async fn handle(&self, session: Arc<Session>, session_ticket: String, command_id: i64) {
        let Some(auth) = &self.auth else {
            warn!("session {}: login attempted with no auth service configured", session.id());
            send_failure(&session, ERR_UNAVAILABLE, "auth unavailable".to_string(), command_id);
            return;
        };

        debug!("session {}: verifying session ticket", session.id());
        let verification = auth.verify_session_ticket(&session_ticket);
        smol::spawn(async move {
            let response = verification.await;
            if !session.is_connected() {
                info!("session {}: disconnected before auth completed", session.id());
                return;
            }
            if response.success {
                session.set_player_id(response.player_id);
                info!(
                    "session {}: authenticated as player {} ({})",
                    session.id(),
                    response.player_id,
                    response.username
                );
                let player_info = PlayerInfo {
                    player_id: response.player_id,
                    name: response.username,
                    position: Vec2::new(response.pos_x, response.pos_y),
                    hp: response.hp,
                    max_hp: response.max_hp,
                };
                match packets::login_success(player_info, command_id) {
                    Ok(frame) => session.send(frame),
                    Err(e) => error!("failed to build login-success frame: {e:#}"),
                }
            } else {
                warn!(
                    "session {}: auth failed ({}): {}",
                    session.id(),
                    response.error_code,
                    response.error_message
                );
                send_failure(&session, response.error_code, response.error_message, command_id);
            }
        })
        .detach();
    }
}

fn send_failure(session: &Session, error_code: i32, error_message: String, command_id: i64) {
    match packets::login_failure(error_code, error_message, command_id) {
        Ok(frame) => session.send(frame),
        Err(e) => error!("failed to build login-failure frame: {e:#}"),
    }
}
