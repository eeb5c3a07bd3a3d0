//! HTTP routes for the zone screening service.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::data::JoinedCandidate;
use crate::engine::{EngineError, MitigationResult};
use crate::zones::{SymbolZones, ZoneKind};
use crate::MitigationState;

// ============================================================================
// Errors
// ============================================================================

/// Error body returned by every route.
#[derive(Debug)]
pub struct ApiError(zone_common::Error);

impl From<zone_common::Error> for ApiError {
    fn from(e: zone_common::Error) -> Self {
        Self(e)
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }

        let body = serde_json::json!({
            "success": false,
            "error": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_kind(raw: &str) -> Result<ZoneKind, ApiError> {
    raw.parse()
        .map_err(|e: String| ApiError(zone_common::Error::InvalidInput(e)))
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub strategy: String,
    pub candidates: Vec<JoinedCandidate>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct MitigationRequest {
    pub strategy: String,
    pub cache_key: String,
    pub kind: ZoneKind,
}

#[derive(Debug, Serialize)]
pub struct MitigationResponse {
    pub cache_key: String,
    pub results: Vec<MitigationResult>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub margins: usize,
    pub strategies: usize,
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: "zone-engine".to_string(),
    })
}

/// Joined candidates for a named strategy
pub async fn get_scan(
    State(state): State<Arc<MitigationState>>,
    Path(strategy): Path<String>,
    Query(query): Query<ScanQuery>,
) -> ApiResult<ScanResponse> {
    let definition = state
        .engine
        .reference()
        .resolve(&strategy)
        .ok_or_else(|| EngineError::StrategyNotFound(strategy.clone()))?;

    let cancel = state.shutdown.child_token();
    let candidates = state
        .engine
        .fetch_with_margin(&definition, query.refresh, &cancel)
        .await?;

    Ok(Json(ScanResponse {
        strategy,
        count: candidates.len(),
        candidates,
    }))
}

/// Evaluate mitigations and cache them under the request's key
pub async fn evaluate_mitigations(
    State(state): State<Arc<MitigationState>>,
    Json(request): Json<MitigationRequest>,
) -> ApiResult<MitigationResponse> {
    let cancel = state.shutdown.child_token();
    let results = state
        .engine
        .evaluate_mitigation(&request.strategy, &request.cache_key, request.kind, &cancel)
        .await?;

    Ok(Json(MitigationResponse {
        cache_key: request.cache_key,
        count: results.len(),
        results,
    }))
}

/// Last cached mitigation batch
pub async fn get_cached_mitigations(
    State(state): State<Arc<MitigationState>>,
    Path(cache_key): Path<String>,
) -> ApiResult<MitigationResponse> {
    let results = state
        .engine
        .cached_mitigations(&cache_key)
        .ok_or_else(|| zone_common::Error::NotFound(format!("mitigations {}", cache_key)))?;

    Ok(Json(MitigationResponse {
        cache_key,
        count: results.len(),
        results,
    }))
}

/// Start an automation run in the background and return immediately
pub async fn trigger_automation(
    State(state): State<Arc<MitigationState>>,
    Path(kind): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_kind(&kind)?;
    let engine = Arc::clone(&state.engine);
    let cancel = state.shutdown.child_token();

    tokio::spawn(async move {
        if let Err(e) = engine.automate(kind, &cancel).await {
            error!(%kind, error = %e, "Triggered automation failed");
        }
    });

    info!(%kind, "Automation triggered");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "success": true, "kind": kind })),
    ))
}

/// Reload margins and strategies from the backing store
pub async fn reload_reference(State(state): State<Arc<MitigationState>>) -> ApiResult<ReloadResponse> {
    let (margins, strategies) = state
        .engine
        .reference()
        .reload_all()
        .await
        .map_err(EngineError::from)?;

    Ok(Json(ReloadResponse {
        margins,
        strategies,
    }))
}

/// Zones recorded for one symbol
pub async fn get_zones(
    State(state): State<Arc<MitigationState>>,
    Path(symbol): Path<String>,
) -> ApiResult<SymbolZones> {
    let mut found = state
        .engine
        .zones()
        .find_zones_for_symbols(std::slice::from_ref(&symbol))
        .await
        .map_err(EngineError::from)?;

    found
        .remove(&symbol)
        .map(Json)
        .ok_or_else(|| zone_common::Error::NotFound(format!("zones for {}", symbol)).into())
}

/// Delete one zone by date
pub async fn delete_zone(
    State(state): State<Arc<MitigationState>>,
    Path((symbol, kind, date)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let kind = parse_kind(&kind)?;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
        ApiError(zone_common::Error::InvalidInput(format!("date {}: {}", date, e)))
    })?;

    let deleted = state
        .engine
        .zones()
        .delete_zone(kind, &symbol, date)
        .await
        .map_err(EngineError::from)?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(zone_common::Error::NotFound(format!("{} zone for {} on {}", kind, symbol, date)).into())
    }
}
