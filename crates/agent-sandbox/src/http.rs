// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The sandbox service's HTTP facade: `/v1/execute`, per-session file and
//! state routes, and health checks. Requests for a session not bound to this
//! pod are proxied to the pod consistent-hash routing picked (§6).

use std::sync::Arc;
use std::time::Duration;

use agent_config::PlatformConfig;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::auth::{AsAuthState, AuthState};
use crate::protocol::{GuestRequest, GuestResponse};
use crate::routing;
use crate::session::SandboxSessionManager;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SandboxSessionManager>,
    pub auth: AuthState,
    pub platform: Arc<PlatformConfig>,
    pub self_url: String,
    pub http_client: reqwest::Client,
}

impl AsAuthState for AppState {
    fn auth_state(&self) -> &AuthState {
        &self.auth
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/execute", post(execute))
        .route("/v1/sessions/:id", axum::routing::delete(close_session))
        .route("/v1/sessions/:id/reset", post(reset_session))
        .route("/v1/sessions/:id/state", get(session_state))
        .route("/v1/sessions/:id/files", post(write_file).get(read_file))
        .route("/v1/sessions/:id/install", post(install_packages))
        .layer(axum::middleware::from_fn_with_state(state.clone(), crate::auth::bearer_auth_mw::<AppState>));

    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/health/ready", get(health_ready))
        .merge(protected)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: ExecuteKind,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub cell_id: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteKind {
    Python,
    Bash,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub guest: GuestResponse,
    pub served_by: String,
}

async fn execute(State(state): State<AppState>, Json(body): Json<ExecuteRequest>) -> Response {
    if body.code.as_bytes().len() > state.platform.max_code_size_bytes {
        return (StatusCode::PAYLOAD_TOO_LARGE, "code exceeds max_code_size_bytes").into_response();
    }
    let pods = state.platform.all_pod_urls();
    let target = match routing::route(&body.session_id, &pods) {
        Some(url) => url.clone(),
        None => state.self_url.clone(),
    };
    if !routing::is_local(&target, &state.self_url) {
        return proxy_execute(&state, &target, &body).await;
    }

    let timeout_secs = state.platform.clamp_timeout_secs(body.timeout_secs.unwrap_or(state.platform.default_timeout_secs));
    let request = match body.kind {
        ExecuteKind::Python => GuestRequest::Python { code: body.code, cell_id: body.cell_id, timeout_secs },
        ExecuteKind::Bash => GuestRequest::Bash { command: body.code, cell_id: body.cell_id, timeout_secs },
    };
    match state.sessions.execute(&body.session_id, request).await {
        Ok(guest) => Json(ExecuteResponse { guest, served_by: state.self_url.clone() }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn proxy_execute(state: &AppState, target: &str, body: &ExecuteRequest) -> Response {
    let url = format!("{}/v1/execute", target.trim_end_matches('/'));
    let mut req = state.http_client.post(&url).json(&serde_json::json!({
        "session_id": body.session_id,
        "type": match body.kind { ExecuteKind::Python => "python", ExecuteKind::Bash => "bash" },
        "code": body.code,
        "cell_id": body.cell_id,
        "timeout_secs": body.timeout_secs,
    }));
    if let Some(token) = &state.platform.bearer_token {
        req = req.bearer_auth(token);
    }
    match req.timeout(Duration::from_secs(state.platform.max_timeout_secs + 5)).send().await {
        Ok(resp) => {
            let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            match resp.bytes().await {
                Ok(bytes) => (status, bytes).into_response(),
                Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
            }
        }
        Err(e) => (StatusCode::BAD_GATEWAY, format!("failed to reach sandbox pod {target}: {e}")).into_response(),
    }
}

async fn close_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    state.sessions.close(&id).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn reset_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.sessions.reset(&id).await {
        Ok(guest) => Json(guest).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn session_state(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.sessions.execute(&id, GuestRequest::GetState).await {
        Ok(guest) => Json(guest).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
}

async fn write_file(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<WriteFileRequest>) -> Response {
    let req = GuestRequest::WriteFile { path: body.path, content: body.content };
    match state.sessions.execute(&id, req).await {
        Ok(guest) => Json(guest).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReadFileQuery {
    pub path: String,
}

async fn read_file(State(state): State<AppState>, Path(id): Path<String>, axum::extract::Query(q): axum::extract::Query<ReadFileQuery>) -> Response {
    let req = GuestRequest::ReadFile { path: q.path };
    match state.sessions.execute(&id, req).await {
        Ok(guest) => Json(guest).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    pub packages: Vec<String>,
}

async fn install_packages(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<InstallRequest>) -> Response {
    let req = GuestRequest::Install { packages: body.packages };
    match state.sessions.execute(&id, req).await {
        Ok(guest) => Json(guest).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn health() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

async fn health_ready(State(state): State<AppState>) -> Response {
    let idle = state.sessions.bound_session_count().await;
    Json(serde_json::json!({ "status": "ready", "bound_sessions": idle })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_request_deserializes_python_kind() {
        let json = serde_json::json!({ "session_id": "s1", "type": "python", "code": "1+1" });
        let req: ExecuteRequest = serde_json::from_value(json).unwrap();
        assert!(matches!(req.kind, ExecuteKind::Python));
        assert_eq!(req.session_id, "s1");
    }
}
