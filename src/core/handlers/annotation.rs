// src/core/handlers/annotation.rs

//! `/annotation`: reads the annotations overlapping a span of a text.

use super::{Handler, RequestContext};
use crate::core::GlossdError;
use crate::core::protocol::{HttpRequest, HttpResponse, Method};
use async_trait::async_trait;
use sqlx::Row;

#[derive(Default)]
pub struct AnnotationHandler;

impl AnnotationHandler {
    pub fn new() -> Self {
        Self
    }

    /// Rows for all annotations of `text_id` contained in `[start, end]`,
    /// rendered as a JSON array.
    async fn select_annotation_data(
        ctx: &mut RequestContext<'_>,
        text_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<serde_json::Value>, GlossdError> {
        let mut txn = ctx.db.begin_transaction().await?;
        let rows = sqlx::query(
            "SELECT id, description, dislikes, likes, created_at, user_id \
             FROM annotations \
             WHERE text_id = $1 AND start_pos >= $2 AND end_pos <= $3 \
             ORDER BY start_pos",
        )
        .bind(text_id)
        .bind(start)
        .bind(end)
        .fetch_all(&mut *txn)
        .await?;
        txn.commit().await?;

        let mut annotations = Vec::with_capacity(rows.len());
        for row in rows {
            annotations.push(serde_json::json!({
                "id": row.try_get::<i64, _>(0)?,
                "description": row.try_get::<String, _>(1)?,
                "dislikes": row.try_get::<i64, _>(2)?,
                "likes": row.try_get::<i64, _>(3)?,
                "created_at": row.try_get::<i64, _>(4)?,
                "user_id": row.try_get::<i64, _>(5)?,
            }));
        }
        Ok(annotations)
    }
}

#[async_trait]
impl Handler for AnnotationHandler {
    fn prefix(&self) -> &'static str {
        "/annotation"
    }

    async fn handle(
        &self,
        req: &HttpRequest,
        ctx: &mut RequestContext<'_>,
    ) -> Result<HttpResponse, GlossdError> {
        if req.method != Method::Get {
            return Ok(HttpResponse::bad_request("Invalid method"));
        }

        let text_id = req.query_param("text_id");
        let start = req.query_param("start");
        let end = req.query_param("end");
        let (Some(text_id), Some(start), Some(end)) = (text_id, start, end) else {
            return Ok(HttpResponse::bad_request(
                "Missing parameters text_id | start | end",
            ));
        };

        let parsed = (
            text_id.parse::<i64>(),
            start.parse::<i64>(),
            end.parse::<i64>(),
        );
        let (Ok(text_id), Ok(start), Ok(end)) = parsed else {
            return Ok(HttpResponse::bad_request(
                "Invalid numeric value for text_id | start | end",
            ));
        };

        let annotations = Self::select_annotation_data(ctx, text_id, start, end).await?;
        if annotations.is_empty() {
            return Ok(HttpResponse::bad_request("No annotations found"));
        }

        Ok(HttpResponse::ok_json(serde_json::Value::Array(annotations)))
    }
}
