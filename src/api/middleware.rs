//! Request pipeline stages.
//!
//! Each stage either hands the request to the next one or answers with an
//! [`ApiError`]; none of them can take the server down.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use tower::{Layer, Service};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::{debug, warn, Level};

use super::handlers::AppState;
use crate::error::ApiError;
use crate::faults::CaughtScope;
use crate::metrics;
use crate::policy::origin::{ALLOWED_HEADERS, ALLOWED_METHODS};
use crate::policy::{GateDecision, OriginDecision, OriginPolicy};

/// Refuse requests whose `Origin` the policy denies.
///
/// A header that is not valid UTF-8 can never match and is echoed lossily.
pub async fn admit_origin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let decision = match request.headers().get(header::ORIGIN) {
        None => OriginDecision::Allowed,
        Some(value) => match value.to_str() {
            Ok(origin) => state.origins.check(Some(origin)),
            Err(_) => OriginDecision::Denied {
                origin: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            },
        },
    };

    match decision {
        OriginDecision::Allowed => next.run(request).await,
        OriginDecision::Denied { origin } => {
            metrics::inc_cors_blocked();
            warn!(
                origin = %origin,
                method = %request.method(),
                path = %request.uri().path(),
                "CORS blocked"
            );
            ApiError::CorsBlocked { origin }.into_response()
        }
    }
}

/// CORS response headers for admitted origins; also answers preflights.
///
/// Admission has already run, so the predicate only decides whether to
/// annotate, never whether to refuse.
pub fn cors_layer(policy: Arc<OriginPolicy>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin.to_str().map(|o| policy.permits(o)).unwrap_or(false)
            },
        ))
        .allow_credentials(true)
        .allow_methods(ALLOWED_METHODS)
        .allow_headers(ALLOWED_HEADERS)
}

/// Short-circuit with 503 while maintenance mode is on.
pub async fn maintenance_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    match state.maintenance.check(request.uri().path()) {
        GateDecision::Pass => next.run(request).await,
        GateDecision::Reject => {
            metrics::inc_maintenance_rejected();
            debug!(path = %request.uri().path(), "Rejected during maintenance");
            ApiError::MaintenanceActive.into_response()
        }
    }
}

/// Buffer and validate JSON bodies before any handler sees them.
///
/// Bodies of other content types pass through untouched. An empty JSON body is
/// accepted; a non-empty one must be an object or array.
pub async fn decode_json_body(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !is_json(request.headers()) {
        return next.run(request).await;
    }

    let limit = state.body_limit;
    if content_length(request.headers()).is_some_and(|len| len > limit as u64) {
        return reject_body(ApiError::PayloadTooLarge);
    }

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => return reject_body(read_error(e)),
    };

    if let Err(e) = validate_json(&bytes) {
        return reject_body(e);
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// Record request count and latency by status, including requests refused by
/// an earlier stage.
pub async fn record_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    metrics::record_http_request(response.status().as_u16(), start.elapsed());
    response
}

/// Access log: one span per request (method, path) and one line per response
/// (status, latency).
pub fn access_log_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        )
}

/// Turn a panic caught at the pipeline boundary into a 500.
///
/// The panic itself has already been reported by the panic hook.
pub fn panic_response(_payload: Box<dyn Any + Send + 'static>) -> Response {
    ApiError::Internal.into_response()
}

/// Runs the inner service inside a [`CaughtScope`], telling the panic hook that
/// a panic here is recovered by the surrounding `CatchPanicLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicScopeLayer;

impl<S> Layer<S> for PanicScopeLayer {
    type Service = PanicScope<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PanicScope { inner }
    }
}

/// Service produced by [`PanicScopeLayer`].
#[derive(Debug, Clone)]
pub struct PanicScope<S> {
    inner: S,
}

impl<S, R> Service<R> for PanicScope<S>
where
    S: Service<R>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ScopedFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: R) -> Self::Future {
        let _scope = CaughtScope::enter();
        ScopedFuture {
            inner: Box::pin(self.inner.call(request)),
        }
    }
}

/// Future that re-enters the [`CaughtScope`] on every poll.
pub struct ScopedFuture<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for ScopedFuture<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _scope = CaughtScope::enter();
        self.inner.as_mut().poll(cx)
    }
}

fn reject_body(error: ApiError) -> Response {
    let reason = match error {
        ApiError::PayloadTooLarge => "too_large",
        _ => "malformed",
    };
    metrics::inc_body_rejected(reason);
    debug!(error = %error, "Request body rejected");
    error.into_response()
}

fn read_error(error: axum::Error) -> ApiError {
    let inner = error.into_inner();
    if inner.is::<LengthLimitError>() {
        ApiError::PayloadTooLarge
    } else {
        ApiError::MalformedBody(format!("failed to read body: {}", inner))
    }
}

fn validate_json(bytes: &[u8]) -> Result<(), ApiError> {
    let Some(first) = bytes.iter().find(|b| !b.is_ascii_whitespace()) else {
        return Ok(());
    };

    if *first != b'{' && *first != b'[' {
        return Err(ApiError::MalformedBody(
            "top-level value must be an object or array".to_string(),
        ));
    }

    serde_json::from_slice::<serde::de::IgnoredAny>(bytes)
        .map(|_| ())
        .map_err(|e| ApiError::MalformedBody(e.to_string()))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
