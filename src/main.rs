//! Sat Search API
//!
//! Search API over a satellite imagery metadata index. Flat key/value
//! parameters are compiled into a structured query, run against
//! Elasticsearch, and returned as a flat list, a GeoJSON feature collection
//! or aggregation counts.

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::Value;
use std::{collections::HashMap, env, net::SocketAddr, sync::Arc, time::Duration};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod aggregation;
mod aoi;
mod elasticsearch;
mod error;
mod geometry;
mod query;
mod search;
mod store;

use elasticsearch::ElasticsearchStore;
use error::SearchError;
use geometry::GeoOps;
use query::ParameterMap;
use search::{Search, SearchContext, SiteInfo};

// ============================================================================
// Configuration
// ============================================================================

/// Process configuration, read once from the environment.
#[derive(Debug, Clone)]
struct Config {
    port: u16,
    es_host: String,
    es_index: String,
    es_timeout: Duration,
    name: String,
    website: String,
}

impl Config {
    fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);
        let es_timeout_ms = env::var("ES_TIMEOUT_MS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(50_000);

        Config {
            port,
            es_host: env::var("ES_HOST").unwrap_or_else(|_| "localhost:9200".into()),
            es_index: env::var("ES_INDEX").unwrap_or_else(|_| "sat-api".into()),
            es_timeout: Duration::from_millis(es_timeout_ms),
            name: env::var("NAME").unwrap_or_else(|_| "sat-api".into()),
            website: env::var("WEBSITE")
                .unwrap_or_else(|_| "https://api.developmentseed.org/satellites/".into()),
        }
    }
}

// ============================================================================
// Application State
// ============================================================================

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    search: Arc<SearchContext>,
}

// ============================================================================
// Error Handling
// ============================================================================

/// API error type for consistent error responses
#[derive(Debug, Serialize)]
struct ApiError {
    code: String,
    description: String,
}

impl ApiError {
    fn from_search(err: &SearchError) -> (StatusCode, Json<ApiError>) {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::BAD_GATEWAY
        };
        (
            status,
            Json(ApiError {
                code: err.code().into(),
                description: err.to_string(),
            }),
        )
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let store = ElasticsearchStore::new(&config.es_host, config.es_timeout)
        .context("Failed to create Elasticsearch client")?;
    info!("Searching index '{}' at {}", config.es_index, store.base_url());

    let state = AppState {
        search: Arc::new(SearchContext {
            store: Arc::new(store),
            geometry: Arc::new(GeoOps),
            index: config.es_index.clone(),
            site: SiteInfo {
                name: config.name.clone(),
                website: config.website.clone(),
            },
        }),
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting search API on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(simple_get).post(simple_post))
        .route("/geojson", get(geojson_get).post(geojson_post))
        .route("/count", get(count_get).post(count_post))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT]),
        )
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Output shape requested by the endpoint.
#[derive(Debug, Clone, Copy)]
enum Mode {
    Simple,
    GeoJson,
    Count,
}

/// Query-string values are always strings.
fn query_params(params: HashMap<String, String>) -> ParameterMap {
    params
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect()
}

/// Run one search and serialize the requested shape.
async fn perform_search(state: &AppState, params: ParameterMap, mode: Mode) -> Response {
    let result = match Search::new(params) {
        Ok(search) => match mode {
            Mode::Simple => search.simple(&state.search).await.map(|r| Json(r).into_response()),
            Mode::GeoJson => search.geojson(&state.search).await.map(|r| Json(r).into_response()),
            Mode::Count => search.count(&state.search).await.map(|r| Json(r).into_response()),
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            warn!("{:?} search failed: {}", mode, e);
            ApiError::from_search(&e).into_response()
        }
    }
}

/// Flat result list (GET)
async fn simple_get(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    perform_search(&state, query_params(params), Mode::Simple).await
}

/// Flat result list (POST)
async fn simple_post(State(state): State<AppState>, Json(body): Json<ParameterMap>) -> Response {
    perform_search(&state, body, Mode::Simple).await
}

/// GeoJSON feature collection (GET)
async fn geojson_get(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    perform_search(&state, query_params(params), Mode::GeoJson).await
}

/// GeoJSON feature collection (POST)
async fn geojson_post(State(state): State<AppState>, Json(body): Json<ParameterMap>) -> Response {
    perform_search(&state, body, Mode::GeoJson).await
}

/// Aggregation counts (GET)
async fn count_get(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    perform_search(&state, query_params(params), Mode::Count).await
}

/// Aggregation counts (POST)
async fn count_post(State(state): State<AppState>, Json(body): Json<ParameterMap>) -> Response {
    perform_search(&state, body, Mode::Count).await
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "index": state.search.index,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::json;
    use crate::store::fixture::FixtureStore;
    use tower::ServiceExt;

    fn test_app(store: FixtureStore) -> (Arc<FixtureStore>, Router) {
        let store = Arc::new(store);
        let state = AppState {
            search: Arc::new(SearchContext {
                store: store.clone(),
                geometry: Arc::new(GeoOps),
                index: "sat-api".into(),
                site: SiteInfo {
                    name: "sat-api".into(),
                    website: "https://example.org/".into(),
                },
            }),
        };
        (store, build_router(state))
    }

    fn scenes(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| json!({"scene_id": format!("S{}", i), "cloud_coverage": 5, "date": "2016-01-01"}))
            .collect()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_, app) = test_app(FixtureStore::new(Vec::new()));
        let (status, json) = send(app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["index"], "sat-api");
    }

    #[tokio::test]
    async fn test_simple_get_with_limit() {
        let (store, app) = test_app(FixtureStore::new(scenes(5)));
        let (status, json) = send(app, get_request("/?limit=2&page=1&sensor=landsat-8")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["meta"]["limit"], 2);
        assert_eq!(json["meta"]["page"], 1);
        assert_eq!(json["meta"]["found"], 5);
        assert_eq!(json["meta"]["license"], "CC0-1.0");
        assert_eq!(json["results"].as_array().unwrap().len(), 2);
        assert_eq!(json["results"][0]["cloudCoverFull"], 5);
        assert_eq!(store.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_simple_post_body() {
        let (_, app) = test_app(FixtureStore::new(scenes(3)));
        let (status, json) = send(app, post("/", json!({"limit": 3, "cloud_to": 10}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["results"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_contains_is_bad_request() {
        let (store, app) = test_app(FixtureStore::new(scenes(1)));
        let (status, json) = send(app, get_request("/?contains=999,45")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "InvalidCoordinates");
        assert!(store.requests().is_empty());
    }

    #[tokio::test]
    async fn test_limit_past_result_window_is_bad_request() {
        let (store, app) = test_app(FixtureStore::new(scenes(1)));
        let (status, json) = send(app, get_request("/?limit=20000")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "InvalidParameter");
        assert!(store.requests().is_empty());
    }

    #[tokio::test]
    async fn test_geojson_endpoint() {
        let (_, app) = test_app(FixtureStore::new(scenes(2)));
        let (status, json) = send(app, get_request("/geojson?limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["properties"]["found"], 2);
        assert_eq!(json["features"][1]["properties"]["scene_id"], "S1");
        assert!(json["features"][1]["geometry"].is_null());
    }

    #[tokio::test]
    async fn test_count_endpoint() {
        let buckets = json!({"terms_satellite_name": {"buckets": []}});
        let (store, app) = test_app(FixtureStore::new(scenes(4)).with_aggregations(buckets.clone()));
        let (status, json) = send(app, post("/count", json!({"fields": "satellite_name"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["meta"]["found"], 4);
        assert!(json["meta"].get("limit").is_none());
        assert_eq!(json["counts"], buckets);
        assert_eq!(store.requests()[0].size, 0);
    }

    #[tokio::test]
    async fn test_self_intersecting_intersects_is_bad_request() {
        let (_, app) = test_app(FixtureStore::new(scenes(1)));
        let bowtie = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [2.0, 2.0], [2.0, 0.0], [0.0, 2.0], [0.0, 0.0]]]
        });
        let (status, json) = send(app, post("/", json!({"intersects": bowtie}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "SelfIntersectingPolygon");
    }

    #[tokio::test]
    async fn test_store_failure_is_bad_gateway() {
        let (_, app) = test_app(FixtureStore::failing());
        let (status, json) = send(app, get_request("/")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["code"], "StoreError");
    }
}
