use crate::http::handlers;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use docrag_core::RagEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RagEngine>,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    pub allowed_origins: Vec<String>,
    /// Files served for any path the API does not claim.
    pub public_dir: Option<PathBuf>,
}

pub fn router(state: AppState, options: &RouterOptions) -> Router {
    let body_limit = state.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    let api = Router::new()
        .route("/", get(handlers::root))
        .route("/document/upload", post(handlers::upload_document))
        .route("/query", post(handlers::query))
        .route("/query/stream", post(handlers::query_stream))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    let app = match &options.public_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };

    app.layer(build_cors_layer(&options.allowed_origins))
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}
