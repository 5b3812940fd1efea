//! Axum adapter for the review pipeline.
//!
//! [`serve_review`] buffers the request body and answers through a shared
//! [`ReviewHandler`]. Every outcome is an HTTP 200 carrying an
//! AdmissionReview; failures are embedded in the review, not in the status.
//!
//! Mount one route per admit function:
//!
//! ```ignore
//! let state = Arc::new(WebhookState::new(ReviewHandler::new(admit_pods)));
//! let app = Router::new()
//!     .route("/pods", post(serve_review))
//!     .with_state(state);
//! ```
//!
//! Binding the listener and terminating TLS are left to the caller.

use std::io;
use std::sync::Arc;

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::webhooks::admit::Admit;
use crate::webhooks::error::ReviewError;
use crate::webhooks::review::{DiagnosticSink, JSON_CONTENT_TYPE, ReviewHandler, TracingSink};

/// Default cap on a buffered review body (the API server's request size limit)
pub const DEFAULT_MAX_BODY_BYTES: usize = 3 * 1024 * 1024;

/// Settings for the HTTP adapter
#[derive(Clone, Debug)]
pub struct ReviewConfig {
    /// Bodies larger than this are treated as unreadable
    pub max_body_bytes: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Shared state for webhook handlers
pub struct WebhookState<A, S = TracingSink> {
    pub handler: ReviewHandler<A, S>,
    pub config: ReviewConfig,
}

impl<A, S> WebhookState<A, S> {
    pub fn new(handler: ReviewHandler<A, S>) -> Self {
        Self::with_config(handler, ReviewConfig::default())
    }

    pub fn with_config(handler: ReviewHandler<A, S>, config: ReviewConfig) -> Self {
        Self { handler, config }
    }
}

/// Answer an admission review delivered over HTTP
pub async fn serve_review<A, S>(
    State(state): State<Arc<WebhookState<A, S>>>,
    request: Request,
) -> Response
where
    A: Admit + 'static,
    S: DiagnosticSink + 'static,
{
    let (parts, body) = request.into_parts();
    debug!(uri = %parts.uri, "Received admission review");

    let body = to_bytes(body, state.config.max_body_bytes)
        .await
        .map(|bytes| bytes.to_vec())
        .map_err(|e| ReviewError::ReadBody(io::Error::other(e)));

    let review = state.handler.review(parts.headers.get(CONTENT_TYPE), body);
    let bytes = state.handler.encode(&review);

    (StatusCode::OK, [(CONTENT_TYPE, JSON_CONTENT_TYPE)], bytes).into_response()
}
