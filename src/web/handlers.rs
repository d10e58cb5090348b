//! HTTP request handlers.

use super::AppState;
use crate::command::CommandError;
use crate::probe::ProbeError;
use crate::registry::{validate_address, DeviceSpec, ProbeSettings, RegistryError};
use crate::wake::{CommandReply, MacAddress, WakeError};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    Unavailable(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let msg = err.to_string();
        match err {
            RegistryError::NotFound(_) => ApiError::NotFound(msg),
            RegistryError::Disabled(_) => ApiError::Conflict(msg),
            RegistryError::InvalidArgument(_) => ApiError::BadRequest(msg),
            RegistryError::Capacity(_) => ApiError::Unavailable(msg),
            RegistryError::Stale(_) | RegistryError::Poisoned => ApiError::Internal(msg),
        }
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        ApiError::Unavailable(err.to_string())
    }
}

impl From<WakeError> for ApiError {
    fn from(err: WakeError) -> Self {
        match err {
            WakeError::Registry(e) => e.into(),
            WakeError::Command(e) => e.into(),
            WakeError::InvalidCommand(_) => ApiError::BadRequest(err.to_string()),
            WakeError::Transport(_) => ApiError::BadGateway(err.to_string()),
        }
    }
}

impl From<ProbeError> for ApiError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Config(_) => ApiError::BadRequest(err.to_string()),
            _ => ApiError::BadGateway(err.to_string()),
        }
    }
}

fn accepted(action: &str, name: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "queued": action, "device": name })),
    )
        .into_response()
}

// ============================================================================
// Health
// ============================================================================

pub async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// API: Devices
// ============================================================================

pub async fn handle_get_devices(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(state.engine.list_devices()?).into_response())
}

pub async fn handle_get_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    Ok(Json(state.engine.get_device(&name)?).into_response())
}

pub async fn handle_create_device(
    State(state): State<AppState>,
    Json(spec): Json<DeviceSpec>,
) -> Result<Response, ApiError> {
    if spec.name.trim().is_empty() {
        return Err(ApiError::BadRequest("device name is empty".to_string()));
    }
    validate_address(&spec.address)?;

    // Best effort: the scheduler still enforces capacity when it applies the add.
    let registry = state.engine.registry();
    if registry.get(&spec.name).is_err() && registry.len()? >= registry.capacity() {
        return Err(RegistryError::Capacity(registry.capacity()).into());
    }

    let name = spec.name.clone();
    state.engine.enqueue_add(spec).await?;
    Ok(accepted("add", &name))
}

pub async fn handle_update_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(settings): Json<ProbeSettings>,
) -> Result<Response, ApiError> {
    state.engine.get_device(&name)?;
    state.engine.enqueue_reconfigure(&name, settings).await?;
    Ok(accepted("reconfigure", &name))
}

pub async fn handle_delete_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    state.engine.get_device(&name)?;
    state.engine.enqueue_remove(&name).await?;
    Ok(accepted("remove", &name))
}

pub async fn handle_device_command(
    State(state): State<AppState>,
    Path((name, verb)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    match state.engine.handle_command(&name, &verb).await? {
        CommandReply::WakeSent => Ok(Json(json!({ "device": name, "action": "wake_sent" })).into_response()),
        CommandReply::Status(device) => Ok(Json(device).into_response()),
        CommandReply::Queued => Ok(accepted(&verb.trim().to_ascii_lowercase(), &name)),
    }
}

// ============================================================================
// API: Direct wake
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WakeRequest {
    pub mac: MacAddress,
    #[serde(default)]
    pub port: Option<u16>,
}

pub async fn handle_wake_mac(
    State(state): State<AppState>,
    Json(req): Json<WakeRequest>,
) -> Result<Response, ApiError> {
    let port = req.port.unwrap_or_else(|| state.engine.wol_port());
    state.engine.wake_mac(req.mac, port).await?;
    Ok(Json(json!({ "mac": req.mac, "port": port, "action": "wake_sent" })).into_response())
}

// ============================================================================
// API: One-shot probe
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ProbeRequest {
    #[serde(alias = "ip")]
    pub address: String,
    #[serde(default)]
    pub timeout_ms: u32,
    #[serde(default)]
    pub count: u32,
}

pub async fn handle_probe_once(
    State(state): State<AppState>,
    Json(req): Json<ProbeRequest>,
) -> Result<Response, ApiError> {
    let timeout = Duration::from_millis(u64::from(req.timeout_ms));
    let reply = state.engine.probe_once(&req.address, timeout, req.count).await?;
    Ok(Json(json!({
        "address": req.address,
        "alive": reply.alive,
        "latency_ms": reply.latency_ms,
    }))
    .into_response())
}
