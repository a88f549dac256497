//! HTTP surface: a health check and one invocation route per public endpoint.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::error::Error;
use crate::schema::Record;

#[derive(Clone, Debug)]
pub struct AppState {
    engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

type ErrorReply = (StatusCode, Json<ErrorResponse>);

fn error_response(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> ErrorReply {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                code,
                message: message.into(),
            },
        }),
    )
}

impl From<Error> for ErrorReply {
    fn from(err: Error) -> Self {
        error_response(err.status_code(), err.code(), err.to_string())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/:endpoint", post(handle_invoke))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// The call runs on its own task so a disconnecting client cancels the model
/// call instead of abandoning it halfway; the engine then records the failure.
async fn handle_invoke(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Record>, ErrorReply> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let engine = state.engine.clone();
    let task = tokio::spawn(async move {
        engine
            .invoke_with_cancellation(&endpoint, &content_type, &body, &cancel)
            .await
    });

    match task.await {
        Ok(Ok(record)) => Ok(Json(record)),
        Ok(Err(err)) => Err(err.into()),
        Err(err) => Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            format!("invocation task failed: {err}"),
        )),
    }
}
