// src/core/handlers/user.rs

//! `/user`: current-user info, login, and registration.

use super::{Handler, RequestContext};
use crate::core::GlossdError;
use crate::core::auth::SessionStore;
use crate::core::protocol::{HttpRequest, HttpResponse, Method};
use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use async_trait::async_trait;
use rand::rngs::OsRng;
use serde_json::Value;
use sqlx::Row;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

pub struct UserHandler {
    sessions: Arc<SessionStore>,
}

struct UserData {
    username: String,
    discord_id: String,
    avatar: String,
    nickname: String,
}

impl UserHandler {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    /// Builds the login response carrying the session cookie.
    fn session_cookie_response(&self, token: &str) -> HttpResponse {
        let max_age = self.sessions.session_ttl().as_secs();
        let mut res = HttpResponse::ok_message("Login successful");
        res.append_header(
            "Set-Cookie",
            &format!(
                "sessionId={token}; HttpOnly; Secure; SameSite=Strict; Max-Age={max_age}"
            ),
        );
        res
    }

    async fn select_user_id(
        ctx: &mut RequestContext<'_>,
        username: &str,
    ) -> Result<Option<i64>, GlossdError> {
        let mut txn = ctx.db.begin_transaction().await?;
        let row = sqlx::query("SELECT id FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&mut *txn)
            .await?;
        txn.commit().await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<i64, _>(0)?),
            None => None,
        })
    }

    async fn select_password_hash(
        ctx: &mut RequestContext<'_>,
        username: &str,
    ) -> Result<Option<String>, GlossdError> {
        let mut txn = ctx.db.begin_transaction().await?;
        let row = sqlx::query("SELECT password_hash FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&mut *txn)
            .await?;
        txn.commit().await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<String, _>(0)?),
            None => None,
        })
    }

    async fn select_user_data(
        ctx: &mut RequestContext<'_>,
        user_id: i64,
    ) -> Result<Option<UserData>, GlossdError> {
        let mut txn = ctx.db.begin_transaction().await?;
        let row = sqlx::query(
            "SELECT username, discord_id, avatar, nickname FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *txn)
        .await?;
        txn.commit().await?;

        Ok(match row {
            Some(row) => Some(UserData {
                username: row.try_get::<String, _>(0)?,
                discord_id: row.try_get::<Option<String>, _>(1)?.unwrap_or_default(),
                avatar: row.try_get::<Option<String>, _>(2)?.unwrap_or_default(),
                nickname: row.try_get::<Option<String>, _>(3)?.unwrap_or_default(),
            }),
            None => None,
        })
    }

    async fn insert_user(
        ctx: &mut RequestContext<'_>,
        username: &str,
        password_hash: &str,
    ) -> Result<(), GlossdError> {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let mut txn = ctx.db.begin_transaction().await?;
        sqlx::query(
            "INSERT INTO users (username, password_hash, created_at) VALUES ($1, $2, $3)",
        )
        .bind(username)
        .bind(password_hash)
        .bind(created_at)
        .execute(&mut *txn)
        .await?;
        txn.commit().await?;
        Ok(())
    }

    /// Pulls `username` and `password` strings out of a JSON body.
    fn credentials_from_body(body: &[u8]) -> Result<(String, String), HttpResponse> {
        let json: Value = serde_json::from_slice(body)
            .map_err(|_| HttpResponse::bad_request("Invalid JSON"))?;

        let username = json.get("username").and_then(Value::as_str);
        let password = json.get("password").and_then(Value::as_str);
        match (username, password) {
            (Some(u), Some(p)) => Ok((u.to_string(), p.to_string())),
            _ => Err(HttpResponse::bad_request("Missing username or password")),
        }
    }

    async fn get_user_info(
        &self,
        req: &HttpRequest,
        ctx: &mut RequestContext<'_>,
    ) -> Result<HttpResponse, GlossdError> {
        let Some(token) = req.cookie("sessionId").map(str::to_string) else {
            return Ok(HttpResponse::unauthorized("Session ID not found"));
        };

        let user_id = match self.sessions.lookup(&token).await {
            Ok(id) => id,
            Err(_) => return Ok(HttpResponse::unauthorized("Invalid session ID")),
        };

        let Some(user) = Self::select_user_data(ctx, user_id).await? else {
            return Ok(HttpResponse::bad_request("User not found"));
        };

        Ok(HttpResponse::ok_json(serde_json::json!({
            "id": user_id,
            "username": user.username,
            "discord_id": user.discord_id,
            "avatar": user.avatar,
            "nickname": user.nickname,
        })))
    }

    async fn login(
        &self,
        req: &HttpRequest,
        ctx: &mut RequestContext<'_>,
    ) -> Result<HttpResponse, GlossdError> {
        let (username, password) = match Self::credentials_from_body(&req.body) {
            Ok(creds) => creds,
            Err(res) => return Ok(res),
        };

        let Some(stored_hash) = Self::select_password_hash(ctx, &username).await? else {
            debug!("Login attempt for unknown user");
            return Ok(HttpResponse::unauthorized("Invalid username or password"));
        };

        let verified = PasswordHash::new(&stored_hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false);
        if !verified {
            return Ok(HttpResponse::unauthorized("Invalid username or password"));
        }

        let Some(user_id) = Self::select_user_id(ctx, &username).await? else {
            return Ok(HttpResponse::bad_request("User not found"));
        };

        let token = match self.sessions.create(user_id, ctx.client_ip).await {
            Ok(token) => token,
            Err(e) => {
                debug!("Failed to persist session: {e}");
                return Ok(HttpResponse::bad_request("Failed to set session ID"));
            }
        };

        Ok(self.session_cookie_response(&token))
    }

    async fn register(
        &self,
        req: &HttpRequest,
        ctx: &mut RequestContext<'_>,
    ) -> Result<HttpResponse, GlossdError> {
        let (username, password) = match Self::credentials_from_body(&req.body) {
            Ok(creds) => creds,
            Err(res) => return Ok(res),
        };

        if Self::select_user_id(ctx, &username).await?.is_some() {
            return Ok(HttpResponse::bad_request("Username taken"));
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = match Argon2::default().hash_password(password.as_bytes(), &salt) {
            Ok(hash) => hash.to_string(),
            Err(_) => return Ok(HttpResponse::bad_request("Failed to hash password")),
        };

        Self::insert_user(ctx, &username, &password_hash).await?;
        Ok(HttpResponse::ok_message("User registered"))
    }
}

#[async_trait]
impl Handler for UserHandler {
    fn prefix(&self) -> &'static str {
        "/user"
    }

    async fn handle(
        &self,
        req: &HttpRequest,
        ctx: &mut RequestContext<'_>,
    ) -> Result<HttpResponse, GlossdError> {
        match req.method {
            Method::Get => self.get_user_info(req, ctx).await,
            Method::Post => self.login(req, ctx).await,
            Method::Put => self.register(req, ctx).await,
            _ => Ok(HttpResponse::bad_request("Invalid request method")),
        }
    }
}
