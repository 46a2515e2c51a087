//! # banter-api
//!
//! The REST surface: login, server/channel CRUD and message history.
//! Everything real-time lives on the websocket (`banter-gateway`);
//! these routes exist for the initial page load and for mutations that
//! are request/response by nature.

pub mod routes;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use banter_store::Directory;
use banter_voice::VoiceManager;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Shared state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<Directory>,
    pub voice: Arc<VoiceManager>,
}

/// Build the API router. `frontend_url` is the extra allowed CORS
/// origin; the local Vite dev server is always allowed.
pub fn build_router(state: AppState, frontend_url: Option<String>) -> Router {
    let api = Router::new()
        .merge(routes::auth::router())
        .merge(routes::servers::router())
        .merge(routes::health::router());

    Router::new()
        .nest("/api", api)
        .layer(cors_layer(frontend_url))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

fn cors_layer(frontend_url: Option<String>) -> CorsLayer {
    let mut origins = vec![HeaderValue::from_static("http://localhost:5173")];
    if let Some(url) = frontend_url {
        match url.parse::<HeaderValue>() {
            Ok(origin) => origins.push(origin),
            Err(error) => {
                tracing::warn!(%url, %error, "FRONTEND_URL is not a valid origin, ignoring")
            }
        }
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}
