// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Thread CRUD and transcript retrieval.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::dto::{message_to_step, CreateThreadRequest, ListThreadsQuery, PatchThreadRequest, Step, Thread};
use crate::error::ApiError;
use crate::state::AppState;

pub async fn create_thread(
    State(state): State<AppState>,
    Json(req): Json<CreateThreadRequest>,
) -> Result<Json<Thread>, ApiError> {
    let thread_id = Uuid::new_v4().to_string();
    let metadata = serde_json::json!({ "name": req.name });
    state
        .memory
        .create_session(&thread_id, req.agent_name.as_deref(), req.user_id.as_deref(), metadata)
        .await?;
    let session = state
        .memory
        .get_session(&thread_id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("session vanished immediately after creation")))?;
    Ok(Json(session.into()))
}

pub async fn list_threads(
    State(state): State<AppState>,
    Query(query): Query<ListThreadsQuery>,
) -> Result<Json<Vec<Thread>>, ApiError> {
    let rows = state.memory.list_sessions(query.limit, query.offset).await?;
    Ok(Json(rows.into_iter().map(Thread::from).collect()))
}

pub async fn get_thread(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Thread>, ApiError> {
    let session = state
        .memory
        .get_session(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("thread {id}")))?;
    Ok(Json(session.into()))
}

pub async fn patch_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PatchThreadRequest>,
) -> Result<Json<Thread>, ApiError> {
    if state.memory.get_session(&id).await?.is_none() {
        return Err(ApiError::NotFound(format!("thread {id}")));
    }
    if let Some(status) = &req.status {
        if !matches!(status.as_str(), "active" | "closed" | "archived") {
            return Err(ApiError::BadRequest(format!("invalid status: {status}")));
        }
        state.memory.set_status(&id, status).await?;
    }
    // `name` lives in the session metadata blob; metadata patching is a
    // follow-up once the cold tier exposes a partial-update path.
    let session = state
        .memory
        .get_session(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("thread {id}")))?;
    Ok(Json(session.into()))
}

pub async fn delete_thread(State(state): State<AppState>, Path(id): Path<String>) -> Result<(), ApiError> {
    state.memory.delete_session(&id).await?;
    state.unregister_bridge(&id);
    Ok(())
}

pub async fn list_messages(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Vec<Step>>, ApiError> {
    if state.memory.get_session(&id).await?.is_none() {
        return Err(ApiError::NotFound(format!("thread {id}")));
    }
    let messages = state.memory.get_messages(&id).await?;
    let now = Utc::now();
    let steps = messages.iter().map(|m| message_to_step(&id, m, now)).collect();
    Ok(Json(steps))
}
