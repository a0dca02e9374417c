/*!
 * JSON handlers for the operator API.
 */

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::database::{MediaKind, RequestListQuery, TranslatableSubtitle};
use crate::file_utils::FileManager;
use crate::language_utils;
use crate::translation::integrity::{self, IntegrityConfig};
use super::AppState;

/// Default page size for listings
const DEFAULT_PAGE_SIZE: i64 = 50;

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, message.into())
}

fn not_found(message: impl Into<String>) -> ApiError {
    (StatusCode::NOT_FOUND, message.into())
}

fn parse_kind(kind: &str) -> Result<MediaKind, ApiError> {
    kind.parse()
        .map_err(|_| bad_request(format!("unknown media kind: {}", kind)))
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestBody {
    pub media_id: i64,
    pub media_kind: String,
    pub title: String,
    pub source_language: String,
    pub target_language: String,
    #[serde(default)]
    pub subtitle_path: Option<String>,
    #[serde(default)]
    pub force_priority: bool,
}

pub async fn create_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRequestBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    language_utils::validate_language_code(&body.source_language)
        .map_err(|e| bad_request(e.to_string()))?;
    language_utils::validate_language_code(&body.target_language)
        .map_err(|e| bad_request(e.to_string()))?;

    let request_id = state
        .service
        .create_request(
            TranslatableSubtitle {
                media_id: body.media_id,
                media_kind: parse_kind(&body.media_kind)?,
                title: body.title,
                source_language: body.source_language,
                target_language: body.target_language,
                subtitle_path: body.subtitle_path,
            },
            body.force_priority,
        )
        .await
        .map_err(internal)?;

    Ok(Json(json!({ "requestId": request_id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequestsParams {
    pub search_query: Option<String>,
    pub order_by: Option<String>,
    #[serde(default)]
    pub ascending: bool,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRequestsParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 500);
    let page = params.page.unwrap_or(1).max(1);

    let result = state
        .service
        .list(RequestListQuery {
            search_query: params.search_query,
            order_by: params.order_by,
            ascending: params.ascending,
            offset: (page - 1) * page_size,
            limit: page_size,
        })
        .await
        .map_err(internal)?;

    Ok(Json(json!({
        "requests": result.requests,
        "total": result.total,
        "page": page,
        "pageSize": page_size,
    })))
}

pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request = state
        .service
        .get(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("request {} not found", id)))?;
    Ok(Json(json!(request)))
}

pub async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request = state.service.cancel(id).await.map_err(internal)?;
    Ok(Json(json!(request)))
}

pub async fn remove_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .remove(id)
        .await
        .map_err(|e| bad_request(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn retry_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let new_id = state
        .service
        .retry(id)
        .await
        .map_err(|e| bad_request(e.to_string()))?;
    Ok(Json(json!({ "requestId": new_id })))
}

pub async fn request_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let logs = state.service.get_logs(id).await.map_err(internal)?;
    Ok(Json(json!(logs)))
}

pub async fn active_count(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let count = state.service.get_active_count().await.map_err(internal)?;
    Ok(Json(json!({ "activeCount": count })))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReenqueueParams {
    #[serde(default)]
    pub include_in_progress: bool,
}

pub async fn reenqueue(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReenqueueParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state
        .service
        .reenqueue_queued(params.include_in_progress)
        .await
        .map_err(internal)?;
    Ok(Json(json!({
        "reenqueued": outcome.reenqueued,
        "skipped": outcome.skipped,
    })))
}

pub async fn dedupe(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state
        .service
        .dedupe_queued_requests()
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "removed": removed })))
}

// ============================================================================
// Media
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMediaParams {
    pub kind: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub async fn list_media(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListMediaParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = params.kind.as_deref().map(parse_kind).transpose()?;
    let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 500);
    let page = params.page.unwrap_or(1).max(1);

    let media = state
        .repo
        .list_media(kind, params.search, (page - 1) * page_size, page_size)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "media": media, "page": page })))
}

#[derive(Debug, Deserialize)]
pub struct ExclusionBody {
    pub excluded: bool,
}

pub async fn set_exclusion(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, i64)>,
    Json(body): Json<ExclusionBody>,
) -> Result<StatusCode, ApiError> {
    let kind = parse_kind(&kind)?;
    let media = state
        .repo
        .get_media_by_kind(kind, id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("media {}/{} not found", kind, id)))?;

    state
        .repo
        .set_media_exclusion(media.id, body.excluded)
        .await
        .map_err(internal)?;
    // Recompute so the dashboard sees NotApplicable immediately
    if let Ok(Some(updated)) = state.repo.get_media_by_kind(kind, id).await {
        let _ = state.state_engine.refresh(&updated).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PriorityBody {
    pub priority: bool,
}

pub async fn set_priority(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, i64)>,
    Json(body): Json<PriorityBody>,
) -> Result<StatusCode, ApiError> {
    let kind = parse_kind(&kind)?;
    state
        .repo
        .set_media_priority(id, body.priority)
        .await
        .map_err(internal)?;
    // Waiters already queued for this media are reordered immediately
    state
        .service
        .refresh_priority_for_media(kind, id)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeThresholdBody {
    pub hours: Option<i64>,
}

pub async fn set_age_threshold(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, i64)>,
    Json(body): Json<AgeThresholdBody>,
) -> Result<StatusCode, ApiError> {
    parse_kind(&kind)?;
    state
        .repo
        .set_media_age_threshold(id, body.hours)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Integrity
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityResult {
    pub file: String,
    pub passed: bool,
    pub reason: Option<String>,
}

pub async fn integrity_check_media(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, i64)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = parse_kind(&kind)?;
    let media = state
        .repo
        .get_media_by_kind(kind, id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("media {}/{} not found", kind, id)))?;

    let settings = state
        .settings
        .translation_settings()
        .await
        .map_err(internal)?;
    let sidecars = FileManager::find_sidecars(media.container_path(), settings.output_tag())
        .map_err(internal)?;

    let source = settings.source_languages.iter().find_map(|configured| {
        sidecars
            .iter()
            .find(|s| language_utils::language_codes_match(&s.language, configured))
    });
    let Some(source) = source else {
        return Ok(Json(json!({ "results": [], "note": "no source sidecar" })));
    };

    let config = IntegrityConfig {
        min_ratio: settings.validation_min_ratio,
    };
    let results: Vec<IntegrityResult> = sidecars
        .iter()
        .filter(|s| s.path != source.path)
        .map(|target| {
            let outcome = integrity::validate_files(&source.path, &target.path, &config);
            IntegrityResult {
                file: target.path.to_string_lossy().to_string(),
                passed: outcome.is_ok(),
                reason: outcome.err(),
            }
        })
        .collect();

    Ok(Json(json!({ "results": results })))
}

pub async fn integrity_check_bulk(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let failures = state.scheduler.integrity_sweep().await.map_err(internal)?;
    Ok(Json(json!({ "removedTargets": failures })))
}

// ============================================================================
// Settings, usage, status
// ============================================================================

pub async fn get_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let all = state.settings.all().await.map_err(internal)?;
    Ok(Json(json!(all)))
}

#[derive(Debug, Deserialize)]
pub struct PutSettingBody {
    pub key: String,
    pub value: String,
}

pub async fn put_setting(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PutSettingBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .settings
        .set(&body.key, &body.value)
        .await
        .map_err(internal)?;

    // Language-affecting keys flush every computed media state
    let flushed = state
        .state_engine
        .on_setting_changed(&body.key)
        .await
        .map_err(internal)?;

    Ok(Json(json!({ "key": body.key, "statesFlushed": flushed })))
}

pub async fn provider_usage(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.gate.snapshot().await.map_err(internal)?;
    Ok(Json(json!(snapshot)))
}

pub async fn status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.repo.connection().stats().map_err(internal)?;
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "media": stats.media_count,
        "requests": stats.request_count,
        "activeRequests": stats.active_requests,
        "workers": {
            "max": state.pool.max_workers(),
            "inFlight": state.pool.in_flight(),
            "queued": state.pool.queued(),
        },
    })))
}
