//! HTTP API exposing the query and dashboard operations.
//!
//! Same semantics as the MCP tools, served as REST endpoints. Every
//! response uses the `{status, data?, error?}` envelope; operational
//! failures stay inside the envelope rather than becoming transport
//! errors.

use anyhow::Context;
use axum::extract::{Path, Query as QueryParams, State};
use axum::response::Json;
use axum::routing::{get, put};
use axum::Router;
use clap::{Arg, ArgAction, Command};
use regex::Regex;
use ringlog::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{self, Config};
use crate::dashboard::{self, DashboardListItem};
use crate::prometheus::{self, QueryResponse};
use crate::timerange;

/// Create the `serve` subcommand.
pub fn command() -> Command {
    config::common_args(
        Command::new("serve").about("Run the Genie HTTP API").arg(
            Arg::new("LISTEN")
                .long("listen")
                .help("Listen address, e.g. 127.0.0.1:8080")
                .action(ArgAction::Set),
        ),
    )
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(&config)?);

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!("listening on {}", config.listen);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Shared handler state: the backend clients.
pub struct AppState {
    pub prometheus: prometheus::Client,
    pub dashboards: Option<dashboard::Client>,
}

impl AppState {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let prometheus = prometheus::Client::new(&config.prometheus_url)?
            .with_guardrails(config.guardrails.clone());

        let dashboards = config
            .dashboard_url
            .as_deref()
            .map(dashboard::Client::new)
            .transpose()?;

        Ok(Self {
            prometheus,
            dashboards,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/metrics", get(list_metrics))
        .route("/api/query", get(instant_query))
        .route("/api/query_range", get(range_query))
        .route("/api/dashboards", get(list_dashboards))
        .route("/api/dashboards/{layout_id}", put(set_dashboard_metadata))
        .with_state(state)
}

/// API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MetricsParams {
    /// Optional regex filter over metric names.
    pub pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InstantQueryParams {
    /// PromQL expression.
    pub query: String,
    /// Evaluation timestamp (RFC 3339 or Unix seconds), defaults to now.
    pub time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQueryParams {
    /// PromQL expression.
    pub query: String,
    /// Range start; used only when `end` is also set.
    pub start: Option<String>,
    /// Range end; the literal `NOW` means no fixed end.
    pub end: Option<String>,
    /// Lookback window such as `15m`, used when no fixed range is given.
    pub duration: Option<String>,
    /// Query resolution step such as `30s`; derived from `width` when
    /// omitted.
    pub step: Option<String>,
    /// Rendered chart width in pixels.
    pub width: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataBody {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub metrics: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DashboardsResponse {
    pub layouts: Vec<DashboardListItem>,
}

async fn list_metrics(
    State(state): State<Arc<AppState>>,
    QueryParams(params): QueryParams<MetricsParams>,
) -> Json<ApiResponse<MetricsResponse>> {
    let metrics = match state.prometheus.list_metrics().await {
        Ok(metrics) => metrics,
        Err(e) => return Json(ApiResponse::error(e.to_string())),
    };

    let metrics = match params.pattern.as_deref().filter(|p| !p.is_empty()) {
        Some(pattern) => match Regex::new(pattern) {
            Ok(pattern) => metrics
                .into_iter()
                .filter(|name| pattern.is_match(name))
                .collect(),
            Err(e) => return Json(ApiResponse::error(format!("invalid pattern: {e}"))),
        },
        None => metrics,
    };

    Json(ApiResponse::success(MetricsResponse { metrics }))
}

async fn instant_query(
    State(state): State<Arc<AppState>>,
    QueryParams(params): QueryParams<InstantQueryParams>,
) -> Json<ApiResponse<QueryResponse>> {
    let time = match params
        .time
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(timerange::parse_timestamp)
        .transpose()
    {
        Ok(time) => time,
        Err(e) => return Json(ApiResponse::error(e.to_string())),
    };

    match state.prometheus.instant_query(&params.query, time).await {
        Ok(response) => Json(ApiResponse::success(response)),
        Err(e) => Json(ApiResponse::error(e.to_string())),
    }
}

async fn range_query(
    State(state): State<Arc<AppState>>,
    QueryParams(params): QueryParams<RangeQueryParams>,
) -> Json<ApiResponse<QueryResponse>> {
    let range = match timerange::resolve(
        params.start.as_deref(),
        params.end.as_deref(),
        params.duration.as_deref(),
    ) {
        Ok(range) => range,
        Err(e) => return Json(ApiResponse::error(e.to_string())),
    };

    let step = match params
        .step
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(timerange::parse_duration)
        .transpose()
    {
        Ok(step) => step,
        Err(e) => return Json(ApiResponse::error(e.to_string())),
    };

    match state
        .prometheus
        .range_query(&params.query, &range, step, params.width)
        .await
    {
        Ok(response) => Json(ApiResponse::success(response)),
        Err(e) => Json(ApiResponse::error(e.to_string())),
    }
}

async fn list_dashboards(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<DashboardsResponse>> {
    let Some(client) = &state.dashboards else {
        return Json(ApiResponse::error(
            "dashboard service is not configured".to_string(),
        ));
    };

    match client.list_dashboards().await {
        Ok(layouts) => Json(ApiResponse::success(DashboardsResponse { layouts })),
        Err(e) => Json(ApiResponse::error(e.to_string())),
    }
}

async fn set_dashboard_metadata(
    State(state): State<Arc<AppState>>,
    Path(layout_id): Path<String>,
    Json(body): Json<MetadataBody>,
) -> Json<ApiResponse<serde_json::Value>> {
    let Some(client) = &state.dashboards else {
        return Json(ApiResponse::error(
            "dashboard service is not configured".to_string(),
        ));
    };

    let description = body.description.as_deref().filter(|d| !d.is_empty());
    match client
        .set_metadata(&layout_id, &body.name, description)
        .await
    {
        Ok(()) => Json(ApiResponse::success(serde_json::json!({
            "layoutId": layout_id,
            "name": body.name.trim(),
        }))),
        Err(e) => Json(ApiResponse::error(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_LISTEN;
    use crate::promql::Guardrails;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn test_router(with_dashboards: bool) -> Router {
        // port 9 is discard; tests only exercise paths that fail before
        // any request is sent
        let config = Config {
            prometheus_url: "http://localhost:9".to_string(),
            dashboard_url: with_dashboards.then(|| "http://localhost:9".to_string()),
            listen: DEFAULT_LISTEN.to_string(),
            guardrails: Guardrails::parse("all").expect("parses"),
            verbose: 0,
        };
        router(Arc::new(AppState::new(&config).expect("state builds")))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        serde_json::from_slice(&bytes).expect("body is json")
    }

    #[tokio::test]
    async fn range_query_rejects_bad_timestamps() {
        let app = test_router(false);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/query_range?query=up%7Bjob%3D%22api%22%7D&start=not-a-date&end=2024-01-02T00:00:00Z")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["error"]
            .as_str()
            .expect("error message")
            .contains("invalid timestamp"));
    }

    #[tokio::test]
    async fn range_query_applies_guardrails() {
        let app = test_router(false);
        let response = app
            .oneshot(
                Request::builder()
                    // bare selector, no label matcher
                    .uri("/api/query_range?query=up")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["error"]
            .as_str()
            .expect("error message")
            .contains("guardrail"));
    }

    #[tokio::test]
    async fn range_query_requires_query_param() {
        let app = test_router(false);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/query_range")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn dashboards_require_configuration() {
        let app = test_router(false);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/dashboards")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["error"]
            .as_str()
            .expect("error message")
            .contains("not configured"));
    }

    #[tokio::test]
    async fn metadata_update_rejects_blank_names() {
        let app = test_router(true);
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/dashboards/layout-1")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name": "   "}"#))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["error"]
            .as_str()
            .expect("error message")
            .contains("must not be empty"));
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let app = test_router(false);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/nope")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
