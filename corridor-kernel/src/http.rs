/**
 * API REST CORRIDOR - Serveur HTTP du kernel relay
 *
 * RÔLE :
 * Surface opérateur et collaborateur REST du relay : déclenchement sirène /
 * corridor / drill sur une zone, persistance des notes pré-arrivée, inspection
 * de l'état (rooms, contrats, health).
 *
 * FONCTIONNEMENT :
 * - Serveur Axum avec middleware auth API key
 * - Routes : /health, /system, /contracts, /rooms, /zones, /ambulances
 * - POST /contracts/{name}/validate : contrôle un payload `data` contre le
 *   contrat (mêmes décodeurs que le transport)
 * - Sérialisation JSON automatique des réponses
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health
 * - Sans clé configurée, toute route protégée répond 401
 */

use crate::contracts::{Contract, ContractRegistry};
use crate::drill::CorridorDrills;
use crate::health::{HealthTracker, RelayHealth};
use crate::hub::RoomSummary;
use crate::prearrival::{PreArrivalQuery, PreArrivalRecord, PreArrivalStore};
use crate::zones::{BroadcastReceipt, ZoneBroadcastService};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use corridor_contracts::{CorridorPhase, PreArrivalNote};
use serde::Deserialize;
use std::num::NonZeroU32;
use tracing::warn;

const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub zones: ZoneBroadcastService,
    pub drills: CorridorDrills,
    pub store: PreArrivalStore,
    pub health: HealthTracker,
    pub contracts: ContractRegistry,
    pub api_key: Option<String>,
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    // Health check toujours accessible
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let Some(expected) = app.api_key.as_deref().filter(|k| !k.is_empty()) else {
        warn!("SECURITY: no API key configured - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path = %req.uri().path(), "rejected request with bad API key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SirenBody {
    eta_minutes: NonZeroU32,
}

#[derive(Debug, Deserialize)]
struct CorridorBody {
    active: bool,
    phase: CorridorPhase,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/contracts", get(list_contracts))
        .route("/contracts/{name}", get(get_contract))
        .route("/contracts/{name}/validate", post(validate_contract))
        .route("/rooms", get(list_rooms))
        .route("/zones/{zone_id}/siren", post(raise_siren))
        .route("/zones/{zone_id}/corridor", post(set_corridor))
        .route("/zones/{zone_id}/drill", post(start_drill))
        .route("/ambulances/pre-arrival", post(record_pre_arrival).get(list_pre_arrival))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

fn zone_key(zone_id: &str) -> Result<&str, StatusCode> {
    let zone = zone_id.trim();
    if zone.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(zone)
}

// GET /system/health (état relay)
async fn get_system_health(State(app): State<AppState>) -> Json<RelayHealth> {
    Json(app.health.get_health(app.zones.hub(), &app.store, &app.contracts))
}

// GET /contracts (liste)
async fn list_contracts(State(app): State<AppState>) -> Json<Vec<String>> {
    Json(app.contracts.list_contracts())
}

// GET /contracts/{name} (détail)
async fn get_contract(State(app): State<AppState>, Path(name): Path<String>) -> Result<Json<Contract>, StatusCode> {
    app.contracts.get_contract(&name).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

// POST /contracts/{name}/validate (corps = payload `data` brut)
async fn validate_contract(
    State(app): State<AppState>,
    Path(name): Path<String>,
    payload: String,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if app.contracts.get_contract(&name).is_none() {
        return Err((StatusCode::NOT_FOUND, Json(serde_json::json!({ "valid": false, "error": "unknown contract" }))));
    }
    match app.contracts.validate_message(&name, &payload) {
        Ok(()) => Ok(Json(serde_json::json!({ "valid": true }))),
        Err(error) => Err((StatusCode::UNPROCESSABLE_ENTITY, Json(serde_json::json!({ "valid": false, "error": error })))),
    }
}

// GET /rooms
async fn list_rooms(State(app): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(app.zones.hub().room_summaries())
}

// POST /zones/{zone_id}/siren
async fn raise_siren(
    State(app): State<AppState>,
    Path(zone_id): Path<String>,
    Json(body): Json<SirenBody>,
) -> Result<Json<BroadcastReceipt>, StatusCode> {
    let zone = zone_key(&zone_id)?;
    Ok(Json(app.zones.raise_siren_alert(zone, body.eta_minutes)))
}

// POST /zones/{zone_id}/corridor
async fn set_corridor(
    State(app): State<AppState>,
    Path(zone_id): Path<String>,
    Json(body): Json<CorridorBody>,
) -> Result<Json<BroadcastReceipt>, StatusCode> {
    let zone = zone_key(&zone_id)?;
    Ok(Json(app.zones.set_corridor_status(zone, body.active, body.phase)))
}

// POST /zones/{zone_id}/drill (séquence asynchrone)
async fn start_drill(
    State(app): State<AppState>,
    Path(zone_id): Path<String>,
    Json(body): Json<SirenBody>,
) -> Result<(StatusCode, Json<BroadcastReceipt>), StatusCode> {
    let zone = zone_key(&zone_id)?;
    Ok((StatusCode::ACCEPTED, Json(app.drills.start_drill(zone, body.eta_minutes))))
}

// POST /ambulances/pre-arrival
async fn record_pre_arrival(
    State(app): State<AppState>,
    Json(note): Json<PreArrivalNote>,
) -> Result<(StatusCode, Json<PreArrivalRecord>), (StatusCode, Json<serde_json::Value>)> {
    match app.store.record(note) {
        Ok(record) => Ok((StatusCode::CREATED, Json(record))),
        Err(e) => Err((StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": e.to_string() })))),
    }
}

// GET /ambulances/pre-arrival?hospitalId=&ambulanceId=&limit=
async fn list_pre_arrival(
    State(app): State<AppState>,
    Query(mut query): Query<PreArrivalQuery>,
) -> Json<Vec<PreArrivalRecord>> {
    query.limit.get_or_insert(DEFAULT_LIST_LIMIT);
    Json(app.store.list(&query))
}
