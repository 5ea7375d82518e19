// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wire types for the chat server's HTTP surface. These are deliberately
//! separate from `agent_memory::Message`/`SessionRow` so the durable storage
//! shape can evolve without breaking the API.

use agent_memory::{FinishReason, Message, Session, SessionRow, Usage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct Thread {
    pub id: String,
    pub name: Option<String>,
    pub agent_name: Option<String>,
    pub user_id: Option<String>,
    pub status: String,
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SessionRow> for Thread {
    fn from(row: SessionRow) -> Self {
        let name = row
            .metadata
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Thread {
            id: row.session_id,
            name,
            agent_name: row.agent_name,
            user_id: row.user_id,
            status: row.status,
            message_count: row.message_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<Session> for Thread {
    fn from(session: Session) -> Self {
        Thread::from(session.row)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateThreadRequest {
    pub name: Option<String>,
    pub agent_name: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PatchThreadRequest {
    pub name: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListThreadsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Server-side persistence view of a message: a `Message` plus the
/// bookkeeping fields a chat UI renders a transcript from.
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub id: Uuid,
    pub thread_id: String,
    pub parent_step_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub step_type: &'static str,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub is_error: bool,
    pub generation: Option<GenerationMetadata>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationMetadata {
    pub usage: Usage,
    pub finish_reason: FinishReason,
    pub tool_call_count: usize,
}

/// A step has no durable `created_at` of its own distinct from the message
/// it wraps, so both are stamped with the same timestamp — the cold tier
/// doesn't track per-message timestamps beyond insertion time today.
pub fn message_to_step(thread_id: &str, message: &Message, created_at: DateTime<Utc>) -> Step {
    let (step_type, name, is_error, generation): (&'static str, String, bool, Option<GenerationMetadata>) =
        match message {
            Message::System { .. } => ("system_message", "system".into(), false, None),
            Message::User { .. } => ("user_message", "user".into(), false, None),
            Message::Assistant { finish_reason, usage, tool_calls, .. } => (
                "assistant_message",
                "assistant".into(),
                matches!(finish_reason, FinishReason::Error),
                Some(GenerationMetadata {
                    usage: usage.clone(),
                    finish_reason: *finish_reason,
                    tool_call_count: tool_calls.len(),
                }),
            ),
            Message::ToolCall { name, .. } => ("tool_call", name.clone(), false, None),
            Message::ToolResult { is_error, .. } => ("tool_result", "tool_result".into(), *is_error, None),
        };

    Step {
        id: message.id(),
        thread_id: thread_id.to_string(),
        parent_step_id: None,
        step_type,
        name,
        created_at,
        is_error,
        generation,
        payload: serde_json::to_value(message).unwrap_or(serde_json::Value::Null),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub thread_id: String,
    pub messages: Vec<ChatInputMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatInputMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    #[serde(flatten)]
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct RespondResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub for_id: Uuid,
    pub thread_id: String,
    pub value: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Feedback {
    pub id: Uuid,
    pub for_id: Uuid,
    pub thread_id: String,
    pub value: i32,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}
