use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::engine::Engine;
use crate::types::{AnalyzeRequest, AnalyzeResponse, ErrorResponse, NO_TEXT_MESSAGE};

#[derive(Clone)]
pub struct AppState {
    engine: Arc<dyn Engine + Send + Sync>,
}

impl AppState {
    pub fn new(engine: Arc<dyn Engine + Send + Sync>) -> Self {
        Self { engine }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/analyze", post(analyze_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    NoText,
    Inference(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::NoText => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: NO_TEXT_MESSAGE.to_string(),
                }),
            )
                .into_response(),
            Self::Inference(err) => {
                tracing::error!(error = %err, "Classification failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

#[tracing::instrument(skip(state, request), fields(request_id = %Uuid::new_v4().simple()))]
async fn analyze_handler(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    counter!("analyze_requests_total").increment(1);

    let text = match request.text {
        Some(text) if !text.is_empty() => text,
        _ => {
            counter!("analyze_rejected_total").increment(1);
            tracing::debug!("Rejecting request without text");
            return Err(ApiError::NoText);
        }
    };

    let started = Instant::now();
    let result = state.engine.classify(text.clone()).await.map_err(|err| {
        counter!("analyze_failures_total").increment(1);
        ApiError::Inference(err)
    })?;
    histogram!("analyze_inference_seconds").record(started.elapsed().as_secs_f64());

    let toxic = result.is_toxic();
    if toxic {
        counter!("analyze_toxic_total").increment(1);
    }
    tracing::info!(
        toxic,
        toxic_prob = result.toxic,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Classification completed"
    );

    Ok(Json(AnalyzeResponse {
        input: text,
        result,
        toxic,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToxicityScores;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, header};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    /// Scores every text the same way and counts calls.
    struct StubEngine {
        scores: ToxicityScores,
        calls: AtomicUsize,
    }

    impl StubEngine {
        fn new(toxic: f64) -> Arc<Self> {
            Arc::new(Self {
                scores: ToxicityScores {
                    non_toxic: 1.0 - toxic,
                    toxic,
                },
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Engine for StubEngine {
        async fn classify(&self, _text: String) -> Result<ToxicityScores> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores)
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl Engine for FailingEngine {
        async fn classify(&self, _text: String) -> Result<ToxicityScores> {
            anyhow::bail!("forward pass exploded")
        }
    }

    fn app(engine: Arc<dyn Engine + Send + Sync>) -> Router {
        router(AppState::new(engine))
    }

    fn analyze(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/analyze")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let engine = StubEngine::new(0.1);
        let (status, body) = send(app(engine.clone()), analyze(r#"{"text": ""}"#)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "No text provided"}));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_text_is_rejected() {
        let engine = StubEngine::new(0.1);
        let (status, body) = send(app(engine.clone()), analyze("{}")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "No text provided"}));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn null_text_is_rejected() {
        let (status, body) = send(app(StubEngine::new(0.1)), analyze(r#"{"text": null}"#)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "No text provided"}));
    }

    #[tokio::test]
    async fn benign_text_echoes_input_and_scores() {
        let (status, body) = send(
            app(StubEngine::new(0.25)),
            analyze(r#"{"text": "مرحبا كيف حالك"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "input": "مرحبا كيف حالك",
                "result": {"non-toxic": 0.75, "toxic": 0.25},
                "toxic": false
            })
        );
    }

    #[tokio::test]
    async fn toxic_verdict_follows_threshold() {
        let (_, over) = send(app(StubEngine::new(0.875)), analyze(r#"{"text": "x"}"#)).await;
        let (_, at) = send(app(StubEngine::new(0.5)), analyze(r#"{"text": "x"}"#)).await;

        assert_eq!(over["toxic"], json!(true));
        assert_eq!(at["toxic"], json!(false));
    }

    #[tokio::test]
    async fn result_has_exactly_two_labels() {
        let (_, body) = send(app(StubEngine::new(0.125)), analyze(r#"{"text": "x"}"#)).await;
        let result = body["result"].as_object().unwrap();

        let mut keys: Vec<_> = result.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, ["non-toxic", "toxic"]);
        let sum: f64 = result.values().filter_map(Value::as_f64).sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn engine_failure_is_opaque_500() {
        let (status, body) = send(app(Arc::new(FailingEngine)), analyze(r#"{"text": "x"}"#)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn non_json_body_is_rejected_before_inference() {
        let engine = StubEngine::new(0.1);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/analyze")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hello"))
            .unwrap();
        let response = app(engine.clone()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn only_post_is_routed() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/analyze")
            .body(Body::empty())
            .unwrap();
        let response = app(StubEngine::new(0.1)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app(StubEngine::new(0.1)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn any_origin_is_allowed() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/analyze")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ORIGIN, "https://example.org")
            .body(Body::from(r#"{"text": "x"}"#))
            .unwrap();
        let response = app(StubEngine::new(0.1)).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn preflight_is_answered() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/analyze")
            .header(header::ORIGIN, "https://example.org")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();
        let response = app(StubEngine::new(0.1)).oneshot(request).await.unwrap();

        assert!(response.status().is_success());
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }
}
