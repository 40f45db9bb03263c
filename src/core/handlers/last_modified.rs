// src/core/handlers/last_modified.rs

//! `/last_modified`: polling endpoint reporting when a table last changed.
//!
//! The table name necessarily lands in the query text (it cannot be a bind
//! parameter), so it is checked against the configured allow-list first and
//! anything unknown is refused.

use super::{Handler, RequestContext};
use crate::config::HandlerConfig;
use crate::core::GlossdError;
use crate::core::protocol::{HttpRequest, HttpResponse, Method};
use async_trait::async_trait;
use sqlx::Row;
use std::time::Duration;

pub struct LastModifiedHandler {
    allowed_tables: Vec<String>,
    window: Duration,
}

impl LastModifiedHandler {
    pub fn new(config: &HandlerConfig) -> Self {
        Self {
            allowed_tables: config.last_modified_tables.clone(),
            window: config.last_modified_window,
        }
    }

    async fn select_last_modified(
        ctx: &mut RequestContext<'_>,
        table: &str,
    ) -> Result<Option<String>, GlossdError> {
        let query = format!(
            "SELECT last_modified::text FROM public.\"{table}\" \
             ORDER BY last_modified DESC LIMIT 1"
        );
        let mut txn = ctx.db.begin_transaction().await?;
        let row = sqlx::query(&query).fetch_optional(&mut *txn).await?;
        txn.commit().await?;

        Ok(match row {
            Some(row) => Some(row.try_get::<String, _>(0)?),
            None => None,
        })
    }
}

#[async_trait]
impl Handler for LastModifiedHandler {
    fn prefix(&self) -> &'static str {
        "/last_modified"
    }

    fn rate_limit(&self) -> Option<Duration> {
        Some(self.window)
    }

    async fn handle(
        &self,
        req: &HttpRequest,
        ctx: &mut RequestContext<'_>,
    ) -> Result<HttpResponse, GlossdError> {
        if req.method != Method::Get {
            return Ok(HttpResponse::bad_request("Invalid method"));
        }

        let Some(table) = req.query_param("table") else {
            return Ok(HttpResponse::bad_request(
                "Invalid request: Missing required field (table).",
            ));
        };

        if !self.allowed_tables.iter().any(|t| t == &table) {
            return Ok(HttpResponse::bad_request("Table not found"));
        }

        let Some(last_modified) = Self::select_last_modified(ctx, &table).await? else {
            return Ok(HttpResponse::bad_request("Table not found"));
        };

        Ok(HttpResponse::ok_json(serde_json::json!({
            "message": "Last modified date found successfully",
            "last_modified": last_modified,
        })))
    }
}
