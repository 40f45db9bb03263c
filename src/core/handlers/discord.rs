// src/core/handlers/discord.rs

//! `/discord`: login with a Discord account via the OAuth code exchange.
//!
//! The account must already be linked (a user row carrying the Discord id);
//! the exchange only authenticates it and refreshes the profile fields.

use super::{Handler, RequestContext};
use crate::config::DiscordConfig;
use crate::core::GlossdError;
use crate::core::auth::SessionStore;
use crate::core::protocol::{HttpRequest, HttpResponse, Method};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::Row;
use std::sync::Arc;
use tracing::debug;

const TOKEN_URL: &str = "https://discord.com/api/oauth2/token";
const USER_URL: &str = "https://discord.com/api/users/@me";

pub struct DiscordHandler {
    config: DiscordConfig,
    sessions: Arc<SessionStore>,
    http: reqwest::Client,
}

struct DiscordUser {
    id: String,
    username: String,
    avatar: String,
}

impl DiscordHandler {
    pub fn new(config: &DiscordConfig, sessions: Arc<SessionStore>) -> Self {
        Self {
            config: config.clone(),
            sessions,
            http: reqwest::Client::new(),
        }
    }

    /// Exchanges the OAuth code for an access token.
    async fn request_access_token(&self, code: &str) -> Result<String, GlossdError> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];

        let token_json: Value = self
            .http
            .post(TOKEN_URL)
            .form(&params)
            .send()
            .await?
            .json()
            .await?;

        token_json
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                GlossdError::HttpClientError("Missing Discord access token".to_string())
            })
    }

    /// Fetches the authenticated user's profile.
    async fn request_user_data(&self, access_token: &str) -> Result<DiscordUser, GlossdError> {
        let user_json: Value = self
            .http
            .get(USER_URL)
            .bearer_auth(access_token)
            .send()
            .await?
            .json()
            .await?;

        let id = user_json.get("id").and_then(Value::as_str);
        let username = user_json.get("username").and_then(Value::as_str);
        let (Some(id), Some(username)) = (id, username) else {
            return Err(GlossdError::HttpClientError(
                "Missing Discord user data".to_string(),
            ));
        };
        let avatar = user_json
            .get("avatar")
            .and_then(Value::as_str)
            .unwrap_or_default();

        Ok(DiscordUser {
            id: id.to_string(),
            username: username.to_string(),
            avatar: avatar.to_string(),
        })
    }

    async fn select_user_id_by_discord_id(
        ctx: &mut RequestContext<'_>,
        discord_id: &str,
    ) -> Result<Option<i64>, GlossdError> {
        let mut txn = ctx.db.begin_transaction().await?;
        let row = sqlx::query("SELECT id FROM users WHERE discord_id = $1")
            .bind(discord_id)
            .fetch_optional(&mut *txn)
            .await?;
        txn.commit().await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<i64, _>(0)?),
            None => None,
        })
    }

    /// Refreshes the profile fields Discord is authoritative for.
    async fn update_user_data(
        ctx: &mut RequestContext<'_>,
        user_id: i64,
        user: &DiscordUser,
    ) -> Result<(), GlossdError> {
        let mut txn = ctx.db.begin_transaction().await?;
        sqlx::query("UPDATE users SET avatar = $1, nickname = $2 WHERE id = $3")
            .bind(&user.avatar)
            .bind(&user.username)
            .bind(user_id)
            .execute(&mut *txn)
            .await?;
        txn.commit().await?;
        Ok(())
    }

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
}

#[async_trait]
impl Handler for DiscordHandler {
    fn prefix(&self) -> &'static str {
        "/discord"
    }

    async fn handle(
        &self,
        req: &HttpRequest,
        ctx: &mut RequestContext<'_>,
    ) -> Result<HttpResponse, GlossdError> {
        if req.method != Method::Post {
            return Ok(HttpResponse::bad_request("Invalid method"));
        }

        if !self.config.is_configured() {
            return Ok(HttpResponse::bad_request("Discord login is not enabled"));
        }

        let json: Value = match serde_json::from_slice(&req.body) {
            Ok(json) => json,
            Err(_) => return Ok(HttpResponse::bad_request("Invalid JSON")),
        };
        let Some(code) = json.get("code").and_then(Value::as_str) else {
            return Ok(HttpResponse::bad_request("Missing Discord OAuth code"));
        };

        let access_token = match self.request_access_token(code).await {
            Ok(token) => token,
            Err(e) => {
                debug!("Discord token exchange failed: {e}");
                return Ok(HttpResponse::bad_request("Failed to get Discord token"));
            }
        };

        let user = match self.request_user_data(&access_token).await {
            Ok(user) => user,
            Err(e) => {
                debug!("Discord user request failed: {e}");
                return Ok(HttpResponse::bad_request("Failed to get Discord user data"));
            }
        };

        let Some(user_id) = Self::select_user_id_by_discord_id(ctx, &user.id).await? else {
            return Ok(HttpResponse::bad_request("User not found"));
        };

        Self::update_user_data(ctx, user_id, &user).await?;

        let token = match self.sessions.create(user_id, ctx.client_ip).await {
            Ok(token) => token,
            Err(e) => {
                debug!("Failed to persist session: {e}");
                return Ok(HttpResponse::bad_request("Failed to set session ID"));
            }
        };

        Ok(self.session_cookie_response(&token))
    }
}
