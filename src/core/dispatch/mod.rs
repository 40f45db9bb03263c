// src/core/dispatch/mod.rs

//! Routes one parsed request to its handler and applies the headers every
//! response carries.
//!
//! CORS preflights are answered here without touching any handler. All other
//! requests are gated by the target handler's rate limit, routed by prefix
//! (first registration wins), and fall back to a 404 envelope when nothing
//! matches. The uniform CORS and keep-alive headers are stamped on at the
//! end regardless of which path produced the response.

use crate::core::GlossdError;
use crate::core::handlers::{Handler, RequestContext};
use crate::core::protocol::{HttpRequest, HttpResponse, Method};
use crate::core::rate_limit::RateLimiter;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The methods this service answers, advertised on every response.
pub const ALLOWED_METHODS: &str = "DELETE, GET, OPTIONS, PATCH, POST, PUT";

/// The ordered set of handler registrations, built once at startup and
/// read-only afterwards.
pub struct Registry {
    handlers: Vec<Box<dyn Handler>>,
}

impl Registry {
    pub fn new(handlers: Vec<Box<dyn Handler>>) -> Self {
        Self { handlers }
    }

    /// First registration whose prefix matches the path wins, in load order.
    pub fn find(&self, path: &str) -> Option<&dyn Handler> {
        self.handlers
            .iter()
            .find(|h| path.starts_with(h.prefix()))
            .map(|h| h.as_ref())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub struct Dispatcher {
    registry: Registry,
    limiter: Arc<RateLimiter>,
}

impl Dispatcher {
    pub fn new(registry: Registry, limiter: Arc<RateLimiter>) -> Self {
        Self { registry, limiter }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Produces the response for one request. Infallible by design: every
    /// error becomes a JSON error envelope here so the session loop only
    /// ever has transport failures to worry about.
    pub async fn dispatch(
        &self,
        req: &HttpRequest,
        ctx: &mut RequestContext<'_>,
    ) -> HttpResponse {
        if req.method == Method::Options {
            return Self::preflight_response(req);
        }

        let mut res = match self.registry.find(req.path()) {
            Some(handler) => {
                if let Some(window) = handler.rate_limit()
                    && !self.limiter.allowed(ctx.client_ip, handler.prefix(), window)
                {
                    debug!(
                        "Rate-limited {} on {}",
                        ctx.client_ip,
                        handler.prefix()
                    );
                    HttpResponse::too_many_requests("Too many requests")
                } else {
                    match handler.handle(req, ctx).await {
                        Ok(res) => res,
                        Err(e) => Self::error_response(e, ctx),
                    }
                }
            }
            None => {
                warn!("No handler found for endpoint: {}", req.target);
                HttpResponse::not_found("Not found")
            }
        };

        Self::decorate(&mut res, req);
        res
    }

    /// Synthesizes the no-body answer to a CORS preflight.
    pub fn preflight_response(req: &HttpRequest) -> HttpResponse {
        let mut res = HttpResponse::with_status(204);
        if let Some(origin) = req.header("origin") {
            res.set_header("Access-Control-Allow-Origin", origin);
        }
        res.set_header("Access-Control-Allow-Methods", ALLOWED_METHODS);
        res.set_header(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization, Access-Control-Allow-Origin",
        );
        res.set_header("Access-Control-Allow-Credentials", "true");
        res.set_header("Connection", "keep-alive");
        res
    }

    /// Maps a handler error onto the response taxonomy. Auth failures stay
    /// deliberately cause-indistinct; backend errors are logged in full but
    /// leave the process as a bare 500.
    fn error_response(e: GlossdError, ctx: &mut RequestContext<'_>) -> HttpResponse {
        match e {
            GlossdError::InvalidRequest(msg) => HttpResponse::bad_request(&msg),
            GlossdError::PayloadTooLarge => HttpResponse::bad_request("Request too large"),
            GlossdError::SessionInvalid => {
                HttpResponse::unauthorized("Invalid or expired session")
            }
            GlossdError::RateLimited => HttpResponse::too_many_requests("Too many requests"),
            GlossdError::Database(msg) => {
                error!("Request handling error: {msg}");
                // The cached connection may be the casualty; have the binding
                // swap it out before its next use.
                ctx.db.poison();
                HttpResponse::internal_error("Operation failed")
            }
            GlossdError::Cache(msg) => {
                error!("Request handling error: {msg}");
                HttpResponse::internal_error("Operation failed")
            }
            other => {
                error!("Request handling error: {other}");
                HttpResponse::internal_error("Operation failed")
            }
        }
    }

    /// Applies the uniform CORS and connection headers to a final response.
    pub fn decorate(res: &mut HttpResponse, req: &HttpRequest) {
        if let Some(origin) = req.header("origin") {
            res.set_header("Access-Control-Allow-Origin", origin);
        }
        res.set_header("Access-Control-Allow-Methods", ALLOWED_METHODS);
        res.set_header(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization",
        );
        res.set_header("Access-Control-Allow-Credentials", "true");

        if req.keep_alive() {
            res.set_header("Connection", "keep-alive");
        } else {
            res.set_header("Connection", "close");
            res.close = true;
        }
        res.set_header("Server", "glossd");
    }
}
