//! malviz-gateway library interface
//!
//! Exposes the router and pipeline for the binary and for integration tests.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod staging;

pub use crate::error::{AnalyzeError, AnalyzeResult, ErrorResponse};

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::GatewayConfig;
use crate::engine::{AnalysisEngine, ProcessEngine};
use crate::pipeline::AnalysisPipeline;
use crate::staging::StagingArea;

/// HTTP surface options
#[derive(Debug, Clone, Default)]
pub struct HttpOptions {
    /// Request body limit; `None` accepts uploads of any size
    pub max_upload_bytes: Option<u64>,
    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Upload-to-result pipeline
    pub pipeline: Arc<AnalysisPipeline>,
    /// Body limit and CORS settings applied by [`build_router`]
    pub http: HttpOptions,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: AnalysisPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            http: HttpOptions::default(),
            startup_time: Utc::now(),
        }
    }

    pub fn with_http_options(mut self, http: HttpOptions) -> Self {
        self.http = http;
        self
    }

    /// Wire the process engine and staging area from resolved configuration
    pub fn from_config(config: &GatewayConfig) -> Self {
        let engine: Arc<dyn AnalysisEngine> = Arc::new(ProcessEngine::from_settings(&config.engine));
        let staging = StagingArea::new(config.storage_root.clone(), config.retention);

        Self::new(AnalysisPipeline::new(staging, engine)).with_http_options(HttpOptions {
            max_upload_bytes: config.max_upload_bytes,
            cors_origins: config.cors_origins.clone(),
        })
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = match state.http.max_upload_bytes {
        Some(limit) => DefaultBodyLimit::max(usize::try_from(limit).unwrap_or(usize::MAX)),
        None => DefaultBodyLimit::disable(),
    };
    let cors = cors_layer(&state.http.cors_origins);

    Router::new()
        .merge(api::analyze_routes())
        .merge(api::health_routes())
        .layer(body_limit)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(allowed))
}
