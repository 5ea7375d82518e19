// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Human feedback on assistant steps (thumbs up/down plus an optional
//! comment). Kept in-process; a real deployment would persist this to the
//! cold tier alongside the session it scores.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::dto::{Feedback, FeedbackRequest};
use crate::error::ApiError;
use crate::state::AppState;

pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<Feedback>, ApiError> {
    if !(-1..=1).contains(&req.value) {
        return Err(ApiError::BadRequest(format!("value must be one of -1, 0, 1, got {}", req.value)));
    }
    if state.memory.get_session(&req.thread_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("thread {}", req.thread_id)));
    }

    let feedback = Feedback {
        id: Uuid::new_v4(),
        for_id: req.for_id,
        thread_id: req.thread_id,
        value: req.value,
        comment: req.comment,
        created_at: Utc::now(),
    };
    state.feedback.lock().unwrap().push(feedback.clone());
    Ok(Json(feedback))
}
