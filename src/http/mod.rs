//! HTTP dispatch: one router mapping the fixed endpoint set onto the
//! session pool, with everything else falling through to static files.

use std::sync::Arc;

use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL};
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::session::SessionManager;

pub mod handlers;
pub mod static_files;


/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

/// Build the service: the endpoint table, the static fallback, and the
/// common response headers every reply carries.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/new_session", get(handlers::new_session))
        .route("/release_session", get(handlers::release_session))
        .route("/execute_query", get(handlers::execute_query))
        .route("/cancel", get(handlers::cancel))
        .route("/upload", post(handlers::upload))
        .route("/read_bytes", get(handlers::read_bytes))
        .route("/read_lines", get(handlers::read_lines))
        .route("/version", get(handlers::version))
        .route("/get_log", get(handlers::get_log));

    #[cfg(debug_assertions)]
    let router = router.route("/debug", get(handlers::debug));

    router
        .fallback(static_files::serve)
        .with_state(state)
        .layer(
            tower::ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(SetResponseHeaderLayer::overriding(
                    ACCESS_CONTROL_ALLOW_ORIGIN,
                    HeaderValue::from_static("*"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    CACHE_CONTROL,
                    HeaderValue::from_static("no-cache"),
                ))
                .layer(CorsLayer::permissive()),
        )
}
