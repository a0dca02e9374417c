/*!
 * Operator HTTP API.
 *
 * A thin axum layer over the core services: request lifecycle endpoints,
 * media toggles, settings, provider usage and the SSE streams. Everything
 * under `/api` sits behind basic auth.
 */

pub mod handlers;
pub mod sse;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use base64::Engine;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::database::Repository;
use crate::media::MediaStateEngine;
use crate::providers::gate::UsageGate;
use crate::queue::TranslationRequestService;
use crate::scheduler::Scheduler;
use crate::settings::SettingsStore;
use crate::translation::SubtitlePipeline;
use crate::workers::WorkerPool;

/// Basic-auth credentials for the operator API
#[derive(Clone)]
pub struct DashboardAuth {
    /// Expected `Authorization` header value
    expected_header: String,
}

impl DashboardAuth {
    /// Build from username and password
    pub fn new(username: &str, password: &str) -> Self {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
        Self {
            expected_header: format!("Basic {}", encoded),
        }
    }

    fn matches(&self, header_value: Option<&str>) -> bool {
        header_value == Some(self.expected_header.as_str())
    }
}

/// Shared application state for the API layer
pub struct AppState {
    pub repo: Repository,
    pub settings: SettingsStore,
    pub service: TranslationRequestService,
    pub state_engine: MediaStateEngine,
    pub pipeline: SubtitlePipeline,
    pub gate: UsageGate,
    pub pool: Arc<WorkerPool>,
    pub scheduler: Arc<Scheduler>,
    pub auth: DashboardAuth,
}

/// Basic-auth guard for every API route
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if !state.auth.matches(provided) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

/// Build the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Requests
        .route("/requests", post(handlers::create_request))
        .route("/requests", get(handlers::list_requests))
        .route("/requests/active-count", get(handlers::active_count))
        .route("/requests/reenqueue", post(handlers::reenqueue))
        .route("/requests/dedupe", post(handlers::dedupe))
        .route("/requests/{id}", get(handlers::get_request))
        .route("/requests/{id}", delete(handlers::remove_request))
        .route("/requests/{id}/cancel", post(handlers::cancel_request))
        .route("/requests/{id}/retry", post(handlers::retry_request))
        .route("/requests/{id}/logs", get(handlers::request_logs))
        // Media
        .route("/media", get(handlers::list_media))
        .route("/media/{kind}/{id}/exclude", post(handlers::set_exclusion))
        .route("/media/{kind}/{id}/priority", post(handlers::set_priority))
        .route(
            "/media/{kind}/{id}/age-threshold",
            post(handlers::set_age_threshold),
        )
        .route(
            "/media/{kind}/{id}/integrity-check",
            post(handlers::integrity_check_media),
        )
        .route("/integrity-check", post(handlers::integrity_check_bulk))
        // Settings and status
        .route("/settings", get(handlers::get_settings))
        .route("/settings", put(handlers::put_setting))
        .route("/provider/usage", get(handlers::provider_usage))
        .route("/status", get(handlers::status))
        // SSE
        .route("/logs/stream", get(sse::log_stream))
        .route("/test-translation/start", get(sse::test_translation))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dashboard_auth_matches_encoded_header() {
        let auth = DashboardAuth::new("admin", "secret");
        // "admin:secret" in base64
        assert!(auth.matches(Some("Basic YWRtaW46c2VjcmV0")));
        assert!(!auth.matches(Some("Basic d3Jvbmc6d3Jvbmc=")));
        assert!(!auth.matches(None));
    }
}
