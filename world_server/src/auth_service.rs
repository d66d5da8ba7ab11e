//! Ticket verification against the external auth service.
//!
//! The core only knows the [`AuthService`] trait; the production
//! implementation speaks HTTP/1.1 directly over an async TCP stream. Each
//! stage of the request (resolve, connect, write, read, parse) maps to its
//! own negative error code so a failed login tells operators exactly where
//! the auth path broke without any packet capture.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use smol::io::{AsyncReadExt, AsyncWriteExt};
use smol::net::TcpStream;

use crate::prelude::*;

pub const ERR_RESOLVE: i32 = -1;
pub const ERR_CONNECT: i32 = -2;
pub const ERR_WRITE: i32 = -4;
pub const ERR_READ: i32 = -5;
pub const ERR_HTTP: i32 = -6;
pub const ERR_BODY: i32 = -7;
pub const ERR_OTHER: i32 = -8;
pub const ERR_UNAVAILABLE: i32 = -99;

/// Outcome of one ticket verification.
#[derive(Debug, Clone, Default)]
pub struct VerifyTicketResponse {
    pub success: bool,
    pub player_id: u64,
    pub username: String,
    pub pos_x: f32,
    pub pos_y: f32,
    pub hp: i32,
    pub max_hp: i32,
    pub error_code: i32,
    pub error_message: String,
}

impl VerifyTicketResponse {
    pub fn failure(error_code: i32, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code,
            error_message: error_message.into(),
            ..Default::default()
        }
    }
}

pub trait AuthService: Send + Sync {
    fn verify_session_ticket(&self, session_ticket: &str) -> BoxFuture<'static, VerifyTicketResponse>;
}

#[derive(Serialize)]
struct VerifyRequest {
    #[serde(rename = "SessionTicket")]
    session_ticket: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponseBody {
    success: bool,
    #[serde(default)]
    player_info: Option<PlayerInfoBody>,
    #[serde(default)]
    error_code: Option<i32>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerInfoBody {
    player_id: u64,
    name: String,
    #[serde(default)]
    pos_x: f32,
    #[serde(default)]
    pos_y: f32,
    hp: i32,
    max_hp: i32,
}

/// HTTP POST `/api/auth/verify` with body `{"SessionTicket": "..."}`.
pub struct HttpAuthService {
    host: String,
    port: u16,
}

impl HttpAuthService {
    pub fn new(host: String, port: u16) -> Self {
        info!("auth service configured for {}:{}", host, port);
        Self { host, port }
    }

    async fn verify(host: String, port: u16, session_ticket: String) -> VerifyTicketResponse {
        let addrs = match smol::net::resolve((host.as_str(), port)).await {
            Ok(addrs) if !addrs.is_empty() => addrs,
            Ok(_) => {
                return VerifyTicketResponse::failure(ERR_RESOLVE, format!("auth server {host} resolved to no addresses"))
            }
            Err(e) => {
                return VerifyTicketResponse::failure(ERR_RESOLVE, format!("auth server dns resolution failed: {e}"))
            }
        };

        let mut stream = None;
        let mut last_error = String::new();
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(connected) => {
                    stream = Some(connected);
                    break;
                }
                Err(e) => last_error = e.to_string(),
            }
        }
        let Some(mut stream) = stream else {
            return VerifyTicketResponse::failure(ERR_CONNECT, format!("auth server connection failed: {last_error}"));
        };

        let body = match serde_json::to_string(&VerifyRequest { session_ticket }) {
            Ok(body) => body,
            Err(e) => return VerifyTicketResponse::failure(ERR_OTHER, format!("request encoding failed: {e}")),
        };
        let request = format!(
            "POST /api/auth/verify HTTP/1.1\r\n\
             Host: {host}\r\n\
             User-Agent: meridian-world-server\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n{body}",
            body.len()
        );
        if let Err(e) = stream.write_all(request.as_bytes()).await {
            return VerifyTicketResponse::failure(ERR_WRITE, format!("auth request write failed: {e}"));
        }

        let mut raw = Vec::new();
        if let Err(e) = stream.read_to_end(&mut raw).await {
            return VerifyTicketResponse::failure(ERR_READ, format!("auth response read failed: {e}"));
        }
        if raw.is_empty() {
            return VerifyTicketResponse::failure(ERR_READ, "auth server closed without a response");
        }

        Self::parse_response(&raw)
    }

    fn parse_response(raw: &[u8]) -> VerifyTicketResponse {
        let text = String::from_utf8_lossy(raw);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return VerifyTicketResponse::failure(ERR_HTTP, "malformed http response from auth server");
        };
        let status = head
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse::<i32>().ok());
        let Some(status) = status else {
            return VerifyTicketResponse::failure(ERR_HTTP, "missing http status line from auth server");
        };

        if status != 200 {
            // Carry the HTTP status through as the error code; append the
            // service's message when it sent one.
            let mut message = format!("auth server returned http {status}");
            if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(body) {
                if let Some(detail) = error_json.get("message").and_then(|m| m.as_str()) {
                    message = format!("{message} - {detail}");
                }
            }
            return VerifyTicketResponse::failure(status, message);
        }

        let parsed: VerifyResponseBody = match serde_json::from_str(body) {
            Ok(parsed) => parsed,
            Err(e) => return VerifyTicketResponse::failure(ERR_BODY, format!("invalid json from auth server: {e}")),
        };

        if !parsed.success {
            return VerifyTicketResponse::failure(
                parsed.error_code.unwrap_or(ERR_OTHER),
                parsed.error_message.unwrap_or_else(|| "ticket rejected".to_string()),
            );
        }
        let Some(info) = parsed.player_info else {
            return VerifyTicketResponse::failure(ERR_HTTP, "auth success without playerInfo");
        };
        VerifyTicketResponse {
            success: true,
            player_id: info.player_id,
            username: info.name,
            pos_x: info.pos_x,
            pos_y: info.pos_y,
            hp: info.hp,
            max_hp: info.max_hp,
            error_code: 0,
            error_message: String::new(),
        }
    }
}

impl AuthService for HttpAuthService {
    fn verify_session_ticket(&self, session_ticket: &str) -> BoxFuture<'static, VerifyTicketResponse> {
        let host = self.host.clone();
        let port = self.port;
        let ticket = session_ticket.to_string();
        Box::pin(Self::verify(host, port, ticket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_success_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n\
            {\"success\":true,\"playerInfo\":{\"playerId\":42,\"name\":\"A\",\"posX\":10.0,\"posY\":20.0,\"hp\":100,\"maxHp\":100}}";
        let response = HttpAuthService::parse_response(raw);
        assert!(response.success);
        assert_eq!(response.player_id, 42);
        assert_eq!(response.username, "A");
        assert_eq!(response.pos_x, 10.0);
        assert_eq!(response.hp, 100);
    }

    #[test]
    fn parses_a_rejection() {
        let raw = b"HTTP/1.1 200 OK\r\n\r\n\
            {\"success\":false,\"errorCode\":3,\"errorMessage\":\"expired ticket\"}";
        let response = HttpAuthService::parse_response(raw);
        assert!(!response.success);
        assert_eq!(response.error_code, 3);
        assert_eq!(response.error_message, "expired ticket");
    }

    #[test]
    fn http_error_status_becomes_the_error_code() {
        let raw = b"HTTP/1.1 503 Service Unavailable\r\n\r\n{\"message\":\"maintenance\"}";
        let response = HttpAuthService::parse_response(raw);
        assert!(!response.success);
        assert_eq!(response.error_code, 503);
        assert!(response.error_message.contains("maintenance"));
    }

    #[test]
    fn parse_stage_errors_are_classified() {
        assert_eq!(HttpAuthService::parse_response(b"not http at all").error_code, ERR_HTTP);
        let bad_body = b"HTTP/1.1 200 OK\r\n\r\nnot json";
        assert_eq!(HttpAuthService::parse_response(bad_body).error_code, ERR_BODY);
        let no_info = b"HTTP/1.1 200 OK\r\n\r\n{\"success\":true}";
        assert_eq!(HttpAuthService::parse_response(no_info).error_code, ERR_HTTP);
    }
}
