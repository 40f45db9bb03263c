use async_trait::async_trait;
use bytes::Bytes;
use glossd::config::DatabaseConfig;
use glossd::core::GlossdError;
use glossd::core::db::{ConnectionPool, DbBinding, PgBinding};
use glossd::core::dispatch::{ALLOWED_METHODS, Dispatcher, Registry};
use glossd::core::handlers::{Handler, RequestContext};
use glossd::core::protocol::{HttpRequest, HttpResponse, Method, Version};
use glossd::core::rate_limit::RateLimiter;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

/// A handler that answers with its own prefix, so tests can see who won.
struct EchoHandler {
    prefix: &'static str,
    window: Option<Duration>,
}

impl EchoHandler {
    fn boxed(prefix: &'static str) -> Box<dyn Handler> {
        Box::new(Self {
            prefix,
            window: None,
        })
    }

    fn rate_limited(prefix: &'static str, window: Duration) -> Box<dyn Handler> {
        Box::new(Self {
            prefix,
            window: Some(window),
        })
    }
}

#[async_trait]
impl Handler for EchoHandler {
    fn prefix(&self) -> &'static str {
        self.prefix
    }

    fn rate_limit(&self) -> Option<Duration> {
        self.window
    }

    async fn handle(
        &self,
        _req: &HttpRequest,
        _ctx: &mut RequestContext<'_>,
    ) -> Result<HttpResponse, GlossdError> {
        Ok(HttpResponse::ok_message(self.prefix))
    }
}

fn request(method: Method, target: &str) -> HttpRequest {
    HttpRequest {
        method,
        target: target.to_string(),
        version: Version::Http11,
        headers: vec![("Origin".to_string(), "https://example.org".to_string())],
        body: Bytes::new(),
    }
}

/// A binding over an empty pool; the stub handlers never touch the database.
async fn test_binding() -> PgBinding {
    let pool = ConnectionPool::bootstrap(DatabaseConfig::default(), 0)
        .await
        .expect("empty pool needs no database");
    DbBinding::new(pool)
}

fn client_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7))
}

fn message_of(res: &HttpResponse) -> String {
    let body: serde_json::Value = serde_json::from_slice(&res.body).unwrap();
    body["message"].as_str().unwrap_or_default().to_string()
}

#[test]
fn test_registry_first_matching_prefix_wins() {
    let registry = Registry::new(vec![EchoHandler::boxed("/user"), EchoHandler::boxed("/annotation")]);

    let handler = registry.find("/annotation").expect("match");
    assert_eq!(handler.prefix(), "/annotation");

    // `/user` being registered first must not capture `/annotation` paths.
    let handler = registry.find("/annotation/extra").expect("match");
    assert_eq!(handler.prefix(), "/annotation");
}

#[test]
fn test_registry_tie_break_is_registration_order() {
    // Both prefixes match "/user/extra/data": the first registered wins,
    // even though the second is the longer match.
    let registry = Registry::new(vec![EchoHandler::boxed("/user"), EchoHandler::boxed("/user/extra")]);
    let handler = registry.find("/user/extra/data").expect("match");
    assert_eq!(handler.prefix(), "/user");

    // Registered the other way round, the longer prefix wins.
    let registry = Registry::new(vec![EchoHandler::boxed("/user/extra"), EchoHandler::boxed("/user")]);
    let handler = registry.find("/user/extra/data").expect("match");
    assert_eq!(handler.prefix(), "/user/extra");
}

#[test]
fn test_registry_no_match() {
    let registry = Registry::new(vec![EchoHandler::boxed("/user")]);
    assert!(registry.find("/annotation").is_none());
}

#[tokio::test]
async fn test_dispatch_routes_by_prefix_with_query_string() {
    let registry = Registry::new(vec![EchoHandler::boxed("/user"), EchoHandler::boxed("/annotation")]);
    let dispatcher = Dispatcher::new(registry, Arc::new(RateLimiter::new()));
    let mut binding = test_binding().await;
    let mut ctx = RequestContext {
        client_ip: client_ip(),
        db: &mut binding,
    };

    let req = request(Method::Get, "/annotation?text_id=1&start=5&end=10");
    let res = dispatcher.dispatch(&req, &mut ctx).await;
    assert_eq!(res.status, 200);
    assert_eq!(message_of(&res), "/annotation");
}

#[tokio::test]
async fn test_dispatch_unmatched_path_is_404_with_cors() {
    let registry = Registry::new(vec![EchoHandler::boxed("/user")]);
    let dispatcher = Dispatcher::new(registry, Arc::new(RateLimiter::new()));
    let mut binding = test_binding().await;
    let mut ctx = RequestContext {
        client_ip: client_ip(),
        db: &mut binding,
    };

    let req = request(Method::Get, "/nonexistent");
    let res = dispatcher.dispatch(&req, &mut ctx).await;
    assert_eq!(res.status, 404);
    assert_eq!(
        res.header("Access-Control-Allow-Origin"),
        Some("https://example.org")
    );
    assert_eq!(res.header("Access-Control-Allow-Credentials"), Some("true"));
    assert_eq!(res.header("Connection"), Some("keep-alive"));
}

#[tokio::test]
async fn test_dispatch_preflight_bypasses_handlers() {
    // No handlers registered at all: OPTIONS must still be answered.
    let dispatcher = Dispatcher::new(Registry::new(vec![]), Arc::new(RateLimiter::new()));
    let mut binding = test_binding().await;
    let mut ctx = RequestContext {
        client_ip: client_ip(),
        db: &mut binding,
    };

    let req = request(Method::Options, "/anything");
    let res = dispatcher.dispatch(&req, &mut ctx).await;
    assert_eq!(res.status, 204);
    assert!(res.body.is_empty());
    assert_eq!(
        res.header("Access-Control-Allow-Origin"),
        Some("https://example.org")
    );
    assert_eq!(
        res.header("Access-Control-Allow-Methods"),
        Some(ALLOWED_METHODS)
    );
}

#[tokio::test]
async fn test_dispatch_applies_handler_rate_limit() {
    let registry = Registry::new(vec![EchoHandler::rate_limited(
        "/last_modified",
        Duration::from_secs(60),
    )]);
    let dispatcher = Dispatcher::new(registry, Arc::new(RateLimiter::new()));
    let mut binding = test_binding().await;
    let mut ctx = RequestContext {
        client_ip: client_ip(),
        db: &mut binding,
    };

    let req = request(Method::Get, "/last_modified?table=texts");
    let first = dispatcher.dispatch(&req, &mut ctx).await;
    assert_eq!(first.status, 200);

    let second = dispatcher.dispatch(&req, &mut ctx).await;
    assert_eq!(second.status, 429);
}

#[tokio::test]
async fn test_dispatch_closes_connection_for_http10_clients() {
    let registry = Registry::new(vec![EchoHandler::boxed("/user")]);
    let dispatcher = Dispatcher::new(registry, Arc::new(RateLimiter::new()));
    let mut binding = test_binding().await;
    let mut ctx = RequestContext {
        client_ip: client_ip(),
        db: &mut binding,
    };

    let mut req = request(Method::Get, "/user");
    req.version = Version::Http10;
    let res = dispatcher.dispatch(&req, &mut ctx).await;
    assert!(res.close);
    assert_eq!(res.header("Connection"), Some("close"));
}
