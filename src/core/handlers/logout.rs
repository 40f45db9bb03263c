// src/core/handlers/logout.rs

//! `/logout`: invalidates the caller's session.

use super::{Handler, RequestContext};
use crate::core::GlossdError;
use crate::core::auth::SessionStore;
use crate::core::protocol::{HttpRequest, HttpResponse, Method};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct LogoutHandler {
    sessions: Arc<SessionStore>,
}

impl LogoutHandler {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Handler for LogoutHandler {
    fn prefix(&self) -> &'static str {
        "/logout"
    }

    async fn handle(
        &self,
        req: &HttpRequest,
        _ctx: &mut RequestContext<'_>,
    ) -> Result<HttpResponse, GlossdError> {
        if req.method != Method::Post {
            return Ok(HttpResponse::bad_request("Invalid request method"));
        }

        let json: Value = match serde_json::from_slice(&req.body) {
            Ok(json) => json,
            Err(_) => return Ok(HttpResponse::bad_request("Invalid JSON request")),
        };
        let Some(user_id) = json.get("user_id").and_then(Value::as_i64) else {
            return Ok(HttpResponse::bad_request("Invalid user id parameters"));
        };

        let Some(token) = req.cookie("sessionId").map(str::to_string) else {
            return Ok(HttpResponse::unauthorized("Invalid or expired session"));
        };

        // The session must belong to the user claiming to log out.
        match self.sessions.lookup(&token).await {
            Ok(session_user) if session_user == user_id => {}
            Ok(_) => {
                return Ok(HttpResponse::unauthorized(
                    "Session id does not match user id!",
                ));
            }
            Err(_) => return Ok(HttpResponse::unauthorized("Invalid or expired session")),
        }

        match self.sessions.invalidate(&token).await {
            Ok(true) => Ok(HttpResponse::ok_message("Successfully logged out")),
            Ok(false) | Err(_) => {
                Ok(HttpResponse::bad_request("Failed to invalidate session"))
            }
        }
    }
}
