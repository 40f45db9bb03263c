// src/core/handlers/mod.rs

//! The pluggable handler units and the contract they implement.
//!
//! Handlers are registered at compile time: every unit implements
//! [`Handler`] and `builtin` assembles the registration list. Dispatch walks
//! the list in registration order, so pluggability costs no dynamic loading
//! and routing stays deterministic.

mod annotation;
mod discord;
mod last_modified;
mod logout;
mod user;

pub use annotation::AnnotationHandler;
pub use discord::DiscordHandler;
pub use last_modified::LastModifiedHandler;
pub use logout::LogoutHandler;
pub use user::UserHandler;

use crate::config::Config;
use crate::core::GlossdError;
use crate::core::auth::SessionStore;
use crate::core::db::PgBinding;
use crate::core::protocol::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Per-request state handed to a handler: the caller's address and the
/// session's database binding. Process-wide services are injected into each
/// handler at construction instead.
pub struct RequestContext<'a> {
    pub client_ip: IpAddr,
    pub db: &'a mut PgBinding,
}

/// One URL-prefix's business logic.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The URL prefix this handler answers for.
    fn prefix(&self) -> &'static str;

    /// Minimum spacing between requests per client IP, if this endpoint is
    /// rate-limited. Consulted by the dispatcher before routing.
    fn rate_limit(&self) -> Option<Duration> {
        None
    }

    async fn handle(
        &self,
        req: &HttpRequest,
        ctx: &mut RequestContext<'_>,
    ) -> Result<HttpResponse, GlossdError>;
}

/// Builds the registration list. Order matters: dispatch walks it front to
/// back and the first matching prefix wins.
pub fn builtin(config: &Config, sessions: Arc<SessionStore>) -> Vec<Box<dyn Handler>> {
    vec![
        Box::new(UserHandler::new(sessions.clone())),
        Box::new(LogoutHandler::new(sessions.clone())),
        Box::new(AnnotationHandler::new()),
        Box::new(LastModifiedHandler::new(&config.handlers)),
        Box::new(DiscordHandler::new(&config.handlers.discord, sessions)),
    ]
}
