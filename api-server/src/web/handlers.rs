//! Route handlers and router construction.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::Config;
use crate::error::ApiError;
use crate::pipeline::{self, HandlerResult};
use crate::schema::{BulkSignupPayload, ExtendedSignupPayload, FieldError, SignupPayload};
use crate::sheets::SheetsClient;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sheets: SheetsClient,
    pub http: reqwest::Client,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: Config,
        sheets: SheetsClient,
        http: reqwest::Client,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            sheets,
            http,
            metrics,
        }
    }
}

/// Build the application router. Middleware layers (trace, CORS) are added
/// by the binary.
pub fn router(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();

    Router::new()
        .route("/health", get(health))
        .route("/config", get(public_config))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats))
        .route("/signup", post(signup))
        .route("/signup/extended", post(signup_extended))
        .route("/signup/bulk", post(signup_bulk))
        .nest_service("/widget", ServeDir::new(static_dir))
        .with_state(state)
}

// =============================================================================
// Operational endpoints
// =============================================================================

/// Health check endpoint.
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Public configuration for widgets. Secrets never appear here.
async fn public_config(State(state): State<AppState>) -> impl IntoResponse {
    let config = &state.config;
    Json(json!({
        "turnstileSiteKey": config.turnstile_site_key,
        "turnstileEnabled": config.turnstile_enabled(),
        "defaultSheetTab": config.default_sheet_tab,
        "corsOrigins": config.cors_origins,
        "metricsEnabled": config.metrics_enabled,
        "rateLimit": {
            "max": config.rate_limit_max,
            "windowSecs": config.rate_limit_window_secs,
        },
    }))
}

/// Prometheus text exposition, gated behind the metrics feature flag.
async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    if !state.config.metrics_enabled {
        return HandlerResult::not_found("Metrics are disabled").into_response();
    }

    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => HandlerResult::not_found("Metrics are disabled").into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    #[serde(rename = "sheetTab")]
    sheet_tab: Option<String>,
}

/// Signup statistics. Adapter failures surface as the generic 500 envelope.
async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<HandlerResult, ApiError> {
    let stats = state.sheets.get_stats(query.sheet_tab.as_deref()).await?;

    Ok(HandlerResult::ok_with_data(
        "Stats retrieved",
        json!({
            "totalSignups": stats.total,
            "sheetTabs": stats.tabs,
        }),
    ))
}

// =============================================================================
// Signup endpoints
// =============================================================================

async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupPayload>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(p)) => p,
        Err(rejection) => return reshape_rejection(rejection),
    };

    info!(has_email = payload.email.is_some(), "signup_received");

    pipeline::process_signup(&state.config, &state.sheets, &state.http, payload)
        .await
        .result
        .into_response()
}

async fn signup_extended(
    State(state): State<AppState>,
    payload: Result<Json<ExtendedSignupPayload>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(p)) => p,
        Err(rejection) => return reshape_rejection(rejection),
    };

    info!(has_email = payload.email.is_some(), "extended_signup_received");

    pipeline::process_extended(&state.config, &state.sheets, &state.http, payload)
        .await
        .result
        .into_response()
}

async fn signup_bulk(
    State(state): State<AppState>,
    payload: Result<Json<BulkSignupPayload>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(p)) => p,
        Err(rejection) => return reshape_rejection(rejection),
    };

    info!(
        count = payload.signups.as_ref().map(Vec::len).unwrap_or(0),
        "bulk_signup_received"
    );

    pipeline::process_bulk(&state.config, &state.sheets, &state.http, payload)
        .await
        .result
        .into_response()
}

/// Reshape axum's own body rejection into the uniform envelope.
fn reshape_rejection(rejection: JsonRejection) -> Response {
    ApiError::Validation(vec![FieldError::new("body", rejection.body_text())]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SHEET: &str = "sheet1";

    fn test_config(uri: &str) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            spreadsheet_id: SHEET.to_string(),
            service_account_email: Some("svc@test".to_string()),
            service_account_private_key: Some("unused".to_string()),
            default_sheet_tab: "Signups".to_string(),
            turnstile_site_key: Some("site-key-public".to_string()),
            turnstile_secret_key: None,
            discord_webhook_url: None,
            cors_origins: vec!["*".to_string()],
            metrics_enabled: false,
            rate_limit_max: 10,
            rate_limit_window_secs: 60,
            request_timeout_ms: 8000,
            static_dir: "static".to_string(),
            sheets_base_url: uri.to_string(),
            token_url: format!("{uri}/token"),
            turnstile_verify_url: format!("{uri}/siteverify"),
        }
    }

    fn app(config: Config, uri: &str) -> Router {
        let sheets = SheetsClient::for_tests(reqwest::Client::new(), uri, SHEET, "test-token");
        router(AppState::new(config, sheets, reqwest::Client::new(), None))
    }

    fn app_with_metrics(config: Config, uri: &str, handle: PrometheusHandle) -> Router {
        let sheets = SheetsClient::for_tests(reqwest::Client::new(), uri, SHEET, "test-token");
        router(AppState::new(
            config,
            sheets,
            reqwest::Client::new(),
            Some(handle),
        ))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let server = MockServer::start().await;
        let app = app(test_config(&server.uri()), &server.uri());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_public_config_has_no_secrets() {
        let server = MockServer::start().await;
        let mut config = test_config(&server.uri());
        config.turnstile_secret_key = Some("very-secret".to_string());
        config.service_account_private_key = Some("pem-secret".to_string());
        let app = app(config, &server.uri());

        let response = app
            .oneshot(Request::builder().uri("/config").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let raw = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!raw.contains("very-secret"));
        assert!(!raw.contains("pem-secret"));

        let body: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(body["turnstileSiteKey"], "site-key-public");
        assert_eq!(body["turnstileEnabled"], true);
        assert_eq!(body["defaultSheetTab"], "Signups");
    }

    #[tokio::test]
    async fn test_metrics_404_when_disabled() {
        let server = MockServer::start().await;
        let app = app(test_config(&server.uri()), &server.uri());

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_renders_when_enabled() {
        let server = MockServer::start().await;
        let mut config = test_config(&server.uri());
        config.metrics_enabled = true;

        let recorder = PrometheusBuilder::new().build_recorder();
        let app = app_with_metrics(config, &server.uri(), recorder.handle());

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn test_signup_malformed_json_gets_envelope() {
        let server = MockServer::start().await;
        let app = app(test_config(&server.uri()), &server.uri());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/signup")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["statusCode"], 400);
        assert_eq!(body["error"], "Validation failed");
        assert!(body["details"][0].as_str().unwrap().starts_with("body:"));
    }

    #[tokio::test]
    async fn test_signup_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v4/spreadsheets/{SHEET}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({ "sheets": [{ "properties": { "title": "Signups" } }] }),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!(
                "/v4/spreadsheets/{SHEET}/values/Signups!A:A"
            )))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "values": [["Email"]] })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!(
                "/v4/spreadsheets/{SHEET}/values/Signups!A:F:append"
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let app = app(test_config(&server.uri()), &server.uri());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/signup")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"email":"New@Example.com"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["email"], "new@example.com");
        assert_eq!(body["data"]["sheetTab"], "Signups");
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v4/spreadsheets/{SHEET}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({ "sheets": [{ "properties": { "title": "Signups" } }] }),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!(
                "/v4/spreadsheets/{SHEET}/values/Signups!A:A"
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({ "values": [["Email"], ["a@example.com"], ["b@example.com"]] }),
            ))
            .mount(&server)
            .await;

        let app = app(test_config(&server.uri()), &server.uri());

        let response = app
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["totalSignups"], 2);
        assert_eq!(body["data"]["sheetTabs"][0], "Signups");
    }

    #[tokio::test]
    async fn test_stats_upstream_failure_is_500() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v4/spreadsheets/{SHEET}")))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let app = app(test_config(&server.uri()), &server.uri());

        let response = app
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal server error");
    }
}
