//! HTTP routes for the generation service.
//!
//! - `POST /generate`: validates the body, admits a session and returns either
//!   a streaming `application/octet-stream` body or a single JSON payload.
//! - `GET /health`: `200` while serving, `503` once shutdown has begun.

use super::{
    context::ServiceContext,
    disconnect,
    multiplexer::{accumulate, stream},
    session::GenerationSession,
};
use crate::server::telemetry::{increment_requests, increment_session_errors};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use genserve_core::{Error, request::GenerationRequest};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{Instrument, Span, field};

pub const STREAM_CONTENT_TYPE: &str = "application/octet-stream";

/// Builds the service router over `ctx`.
pub fn router(ctx: ServiceContext) -> Router {
    let max_body_bytes = ctx.config().max_body_bytes;
    Router::new()
        .route("/generate", post(generate))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .with_state(ctx)
}

/// Handles `POST /generate`.
///
/// The body is read as raw bytes so that every shape problem surfaces as a
/// `MalformedRequest` rather than an extractor rejection.
#[tracing::instrument(skip_all, fields(request_id = field::Empty, stream = field::Empty))]
async fn generate(State(ctx): State<ServiceContext>, body: Bytes) -> Result<Response, Error> {
    increment_requests();
    respond(&ctx, &body).await.inspect_err(|e| {
        increment_session_errors();
        if e.is_client_error() {
            tracing::debug!("Rejected request: {e}");
        }
    })
}

async fn respond(ctx: &ServiceContext, body: &[u8]) -> Result<Response, Error> {
    let request = GenerationRequest::from_slice(body)?;
    let (prompt, streaming, params) = request.into_parts();
    let session = GenerationSession::admit(ctx, prompt, params)?;

    let span = Span::current();
    span.record("request_id", field::display(session.id()));
    span.record("stream", streaming);
    tracing::debug!("Admitted session");

    let (transport, monitor) = disconnect::transport();

    if streaming {
        let chunks = stream(session, monitor, transport, ctx.config().stream_buffer_size);
        return Ok((
            [(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)],
            Body::from_stream(chunks),
        )
            .into_response());
    }

    // The session runs in its own task so that it outlives this future: if
    // the client disconnects, hyper drops the future, `transport` goes with
    // it, and the task observes the disconnect and cancels the session.
    let task = tokio::spawn(accumulate(session, monitor).in_current_span());
    let payload = task.await.map_err(|e| Error::ChannelError {
        context: format!("Session task failed: {e}"),
    })?;
    drop(transport);

    Ok(Json(payload?).into_response())
}

async fn health(State(ctx): State<ServiceContext>) -> impl IntoResponse {
    if ctx.is_serving() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    }
}
