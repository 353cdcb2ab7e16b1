// HTTP surface: the two function endpoints plus monitoring routes

pub mod error;
pub mod routes;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::orchestration::{DrinkAnalyzer, ReminderDispatcher};
use crate::utils::Metrics;

pub use error::ApiError;

/// Base64 photos from phones run a few MB
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<DrinkAnalyzer>,
    pub dispatcher: Arc<ReminderDispatcher>,
    pub metrics: Metrics,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics_endpoint))
        .route("/stats", get(routes::stats_endpoint))
        .route("/analyze-drink-image", post(routes::analyze_drink_image))
        .route("/send-hydration-reminder", post(routes::send_hydration_reminder))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{AnalysisConfig, ReminderConfig};
    use crate::core::errors::{StoreError, StoreResult, UpstreamResult};
    use crate::core::types::{
        AccountingOutcome, AccountingRequest, AnalysisCacheEntry, AnalysisResult, DrinkActivity,
        HydrationPlan, NotificationTemplate, SentNotificationRecord, UserProfile,
    };
    use crate::services::interpretation::{parse_interpretation, InterpretationService};
    use crate::services::push::{PushMessage, PushOutcome, PushService};
    use crate::services::vision::{VisionService, VisualFeatures};
    use crate::storage::{MemoryStore, Store};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use chrono::{DateTime, Duration, Utc};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct StaticVision;

    #[async_trait]
    impl VisionService for StaticVision {
        async fn extract_features(&self, _image: &str) -> UpstreamResult<VisualFeatures> {
            Ok(VisualFeatures::default())
        }
    }

    struct StaticInterpreter(&'static str);

    #[async_trait]
    impl InterpretationService for StaticInterpreter {
        async fn interpret(&self, _features: &VisualFeatures) -> UpstreamResult<AnalysisResult> {
            Ok(parse_interpretation(self.0))
        }
    }

    struct NoopPush;

    #[async_trait]
    impl PushService for NoopPush {
        async fn send(&self, _message: &PushMessage) -> UpstreamResult<PushOutcome> {
            Ok(PushOutcome::Delivered { ticket_id: None })
        }
    }

    /// Store whose every call fails
    struct DownStore;

    fn down<T>() -> StoreResult<T> {
        Err(StoreError::Api {
            status: 503,
            message: "database unavailable".to_string(),
        })
    }

    #[async_trait]
    impl Store for DownStore {
        async fn cached_analysis(&self, _: &str) -> StoreResult<Option<AnalysisCacheEntry>> {
            down()
        }
        async fn process_analysis(&self, _: AccountingRequest) -> StoreResult<AccountingOutcome> {
            down()
        }
        async fn profile(&self, _: &str) -> StoreResult<Option<UserProfile>> {
            down()
        }
        async fn coaching_users(&self) -> StoreResult<Vec<UserProfile>> {
            down()
        }
        async fn hydration_plan(&self, _: &str) -> StoreResult<Option<HydrationPlan>> {
            down()
        }
        async fn drink_activity(&self, _: &str, _: DateTime<Utc>, _: DateTime<Utc>) -> StoreResult<DrinkActivity> {
            down()
        }
        async fn template(&self, _: &str) -> StoreResult<Option<NotificationTemplate>> {
            down()
        }
        async fn recent_notifications(&self, _: &str, _: DateTime<Utc>) -> StoreResult<Vec<SentNotificationRecord>> {
            down()
        }
        async fn record_notification(&self, _: SentNotificationRecord) -> StoreResult<()> {
            down()
        }
        async fn clear_push_token(&self, _: &str) -> StoreResult<()> {
            down()
        }
    }

    fn app_with(store: Arc<dyn Store>, reply: &'static str) -> Router {
        let metrics = Metrics::new();
        let analyzer = DrinkAnalyzer::new(
            store.clone(),
            Arc::new(StaticVision),
            Arc::new(StaticInterpreter(reply)),
            &AnalysisConfig {
                cache_ttl_days: 7,
                trial_daily_scans: 3,
                paid_daily_scans: 8,
            },
            metrics.clone(),
        );
        let dispatcher = ReminderDispatcher::new(
            store,
            Arc::new(NoopPush),
            &ReminderConfig {
                window_minutes: 2,
                dedup_hours: 24,
            },
            metrics.clone(),
        );
        router(AppState {
            analyzer: Arc::new(analyzer),
            dispatcher: Arc::new(dispatcher),
            metrics,
        })
    }

    fn app(reply: &'static str) -> Router {
        app_with(Arc::new(MemoryStore::new(64, Duration::days(7))), reply)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    const SODA: &str = r#"{"drinkName": "Coca-Cola", "estimatedOz": 12, "confidence": 0.95, "description": "Red can"}"#;

    #[tokio::test]
    async fn test_analyze_returns_result_then_cached() {
        let app = app(SODA);
        let request = || post_json("/analyze-drink-image", json!({"image": "Y29sYS1jYW4=", "userId": "u1"}));

        let (status, body) = send(&app, request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Coca-Cola");
        assert_eq!(body["estimatedOz"], 12.0);
        assert_eq!(body["cached"], false);
        assert_eq!(body["category"], "soda");

        let (_, body) = send(&app, request()).await;
        assert_eq!(body["cached"], true);
    }

    #[tokio::test]
    async fn test_analyze_without_image_is_bad_request() {
        let (status, body) = send(&app(SODA), post_json("/analyze-drink-image", json!({"userId": "u1"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image provided");
    }

    #[tokio::test]
    async fn test_trial_quota_returns_429() {
        let app = app(SODA);
        for i in 0..3 {
            let (status, _) = send(&app, post_json("/analyze-drink-image", json!({"image": format!("aW1n{i}"), "userId": "t1"}))).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(&app, post_json("/analyze-drink-image", json!({"image": "aW1nMw==", "userId": "t1"}))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["errorType"], "TRIAL_LIMIT_EXCEEDED");
        assert_eq!(body["limitExceeded"], true);
        assert!(body["error"].as_str().unwrap().contains("daily limit of 3"));
    }

    #[tokio::test]
    async fn test_malformed_model_reply_still_succeeds() {
        let (status, body) = send(&app("no idea, sorry"), post_json("/analyze-drink-image", json!({"image": "eHl6"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Water");
        assert_eq!(body["estimatedOz"], 8.0);
        assert_eq!(body["confidence"], 0.5);
    }

    #[tokio::test]
    async fn test_accounting_failure_is_internal_error() {
        let app = app_with(Arc::new(DownStore), SODA);
        let (status, body) = send(&app, post_json("/analyze-drink-image", json!({"image": "eHl6", "userId": "u1"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("database unavailable"));
    }

    #[tokio::test]
    async fn test_reminder_run_reports_success() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/send-hydration-reminder")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app(SODA), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "notificationsSent": 0, "details": []}));
    }

    #[tokio::test]
    async fn test_reminder_run_fails_when_users_cannot_be_listed() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/send-hydration-reminder")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app_with(Arc::new(DownStore), SODA), request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/analyze-drink-image")
            .header(header::ORIGIN, "http://localhost:8081")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let response = app(SODA).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn test_monitoring_routes() {
        let app = app(SODA);
        let get = |uri: &str| Request::builder().uri(uri).body(Body::empty()).unwrap();

        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let response = app.clone().oneshot(get("/metrics")).await.unwrap();
        let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&text).contains("drink_scans_total"));

        let (status, body) = send(&app, get("/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("scans_total").is_some());
    }

    #[tokio::test]
    async fn test_unreadable_body_gets_json_error() {
        let app = app(SODA);
        let raw = |content_type: Option<&str>, body: &'static str| {
            let mut builder = Request::builder().method(Method::POST).uri("/analyze-drink-image");
            if let Some(content_type) = content_type {
                builder = builder.header(header::CONTENT_TYPE, content_type);
            }
            builder.body(Body::from(body)).unwrap()
        };

        let (status, body) = send(&app, raw(None, r#"{"image": "eHl6"}"#)).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(body["error"].is_string());

        let (status, body) = send(&app, raw(Some("application/json"), "image=eHl6")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = send(&app, post_json("/analyze-drink-image", json!({"image": 123}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_stats_count_scans_and_endpoints() {
        let app = app(SODA);
        for i in 0..4 {
            send(&app, post_json("/analyze-drink-image", json!({"image": format!("c3RhdH{i}"), "userId": "t2"}))).await;
        }

        let request = Request::builder().uri("/stats").body(Body::empty()).unwrap();
        let (_, body) = send(&app, request).await;
        assert_eq!(body["scans_total"], 4);
        assert_eq!(body["scans_limited"], 1);
        assert_eq!(body["endpoint_requests"], json!([["/analyze-drink-image", 4]]));
    }
}
