//! HTTP routes and breaker outcome mapping

use crate::error::UpstreamError;
use crate::upstream::Upstream;
use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tripwire::{CircuitBreaker, CircuitError};

/// Shared handler state: one breaker per upstream
pub struct AppState<U> {
    pub breaker: Arc<CircuitBreaker>,
    pub upstream: Arc<U>,
}

impl<U> AppState<U> {
    pub fn new(breaker: Arc<CircuitBreaker>, upstream: Arc<U>) -> Self {
        Self { breaker, upstream }
    }
}

impl<U> Clone for AppState<U> {
    fn clone(&self) -> Self {
        Self {
            breaker: Arc::clone(&self.breaker),
            upstream: Arc::clone(&self.upstream),
        }
    }
}

pub fn router<U: Upstream>(state: AppState<U>) -> Router {
    Router::new()
        .route("/", get(fetch_upstream::<U>))
        .route("/breaker", get(breaker_status::<U>))
        .with_state(state)
}

async fn fetch_upstream<U: Upstream>(State(state): State<AppState<U>>) -> Response {
    let outcome = state.breaker.call_async(|| state.upstream.fetch()).await;
    respond(outcome)
}

/// Map a guarded fetch to the gateway's JSON envelope
pub fn respond(outcome: Result<Value, CircuitError<UpstreamError>>) -> Response {
    match outcome {
        Ok(data) => (
            StatusCode::OK,
            Json(json!({
                "status_code": 200,
                "success": true,
                "message": "Success get upstream data",
                "data": data,
            })),
        )
            .into_response(),
        Err(CircuitError::Execution(e)) => {
            warn!(error = %e, "upstream request failed");
            unavailable(format!("Request failed: {}", e)).into_response()
        }
        Err(rejected) => {
            let body = unavailable(format!("Circuit breaker active: {}", rejected));
            match &rejected {
                CircuitError::Open { retry_after, .. } => (
                    [(header::RETRY_AFTER, retry_after_secs(*retry_after).to_string())],
                    body,
                )
                    .into_response(),
                _ => body.into_response(),
            }
        }
    }
}

fn unavailable(message: String) -> (StatusCode, Json<Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "status_code": 503,
            "success": false,
            "message": message,
        })),
    )
}

/// Whole seconds, rounded up so clients never retry early
fn retry_after_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

async fn breaker_status<U: Upstream>(State(state): State<AppState<U>>) -> Json<Value> {
    let snapshot = state.breaker.snapshot();
    Json(json!({
        "name": snapshot.name,
        "state": snapshot.state.as_str(),
        "failure_count": snapshot.failure_count,
        "failure_threshold": snapshot.failure_threshold,
        "recovery_timeout_secs": snapshot.recovery_timeout.as_secs_f64(),
        "last_failure_at_secs": snapshot.last_failure_at.map(|d| d.as_secs_f64()),
        "retry_after_secs": snapshot.retry_after.map(|d| d.as_secs_f64()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::upstream_classifier;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
    use tower::ServiceExt;
    use tripwire::ManualClock;

    /// Upstream answering with a configurable status
    #[derive(Default)]
    struct FakeUpstream {
        /// 0 means healthy
        failing_status: AtomicU16,
        calls: AtomicUsize,
    }

    impl FakeUpstream {
        fn fail_with(&self, status: u16) {
            self.failing_status.store(status, Ordering::SeqCst);
        }

        fn recover(&self) {
            self.failing_status.store(0, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Upstream for FakeUpstream {
        async fn fetch(&self) -> Result<Value, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.failing_status.load(Ordering::SeqCst) {
                0 => Ok(json!({ "name": "Tatooine" })),
                status => Err(UpstreamError::Status { status }),
            }
        }
    }

    fn app(threshold: u32) -> (Router, Arc<FakeUpstream>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::builder("upstream")
            .failure_threshold(threshold)
            .recovery_timeout(Duration::from_secs(60))
            .clock(clock.clone())
            .failure_classifier(upstream_classifier(false))
            .build()
            .unwrap();
        let upstream = Arc::new(FakeUpstream::default());
        let router = router(AppState::new(Arc::new(breaker), upstream.clone()));
        (router, upstream, clock)
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Option<String>, Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, retry_after, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_healthy_upstream_passes_through() {
        let (app, upstream, _clock) = app(3);

        let (status, _, body) = get_json(&app, "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["name"], "Tatooine");
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_failures_then_circuit_open() {
        let (app, upstream, _clock) = app(2);
        upstream.fail_with(503);

        for _ in 0..2 {
            let (status, retry_after, body) = get_json(&app, "/").await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(body["message"], "Request failed: upstream returned HTTP 503");
            assert!(retry_after.is_none());
        }

        let (status, retry_after, body) = get_json(&app, "/").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .starts_with("Circuit breaker active: Circuit 'upstream' is open")
        );
        assert_eq!(retry_after.as_deref(), Some("60"));
        assert_eq!(upstream.calls(), 2, "open circuit must not reach the upstream");
    }

    #[tokio::test]
    async fn test_recovery_after_timeout() {
        let (app, upstream, clock) = app(1);
        upstream.fail_with(500);
        let _ = get_json(&app, "/").await;

        upstream.recover();
        let (status, _, _) = get_json(&app, "/").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        clock.advance(Duration::from_secs(61));
        let (status, _, body) = get_json(&app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Tatooine");

        let (_, _, breaker) = get_json(&app, "/breaker").await;
        assert_eq!(breaker["state"], "Closed");
        assert_eq!(breaker["failure_count"], 0);
    }

    #[tokio::test]
    async fn test_client_errors_do_not_trip() {
        let (app, upstream, _clock) = app(1);
        upstream.fail_with(404);

        for _ in 0..3 {
            let (_, _, body) = get_json(&app, "/").await;
            assert_eq!(body["message"], "Request failed: upstream returned HTTP 404");
        }

        assert_eq!(upstream.calls(), 3);
        let (_, _, breaker) = get_json(&app, "/breaker").await;
        assert_eq!(breaker["state"], "Closed");
    }

    #[tokio::test]
    async fn test_breaker_status_while_open() {
        let (app, upstream, clock) = app(1);
        upstream.fail_with(502);
        clock.set(Duration::from_secs(5));
        let _ = get_json(&app, "/").await;
        clock.advance(Duration::from_secs(15));

        let (status, _, body) = get_json(&app, "/breaker").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "upstream");
        assert_eq!(body["state"], "Open");
        assert_eq!(body["failure_count"], 1);
        assert_eq!(body["failure_threshold"], 1);
        assert_eq!(body["recovery_timeout_secs"], 60.0);
        assert_eq!(body["last_failure_at_secs"], 5.0);
        assert_eq!(body["retry_after_secs"], 45.0);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
        assert_eq!(retry_after_secs(Duration::from_millis(2001)), 3);
        assert_eq!(retry_after_secs(Duration::ZERO), 0);
    }
}
