// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The streaming `/chat` endpoint and its `/chat/respond/{request_id}`
//! companion. A chat turn multiplexes two event sources onto one SSE
//! stream: the orchestrator's [`AgentChunk`]s and the HITL bridge's
//! [`OutgoingEvent`]s (tool-approval/human-input requests the orchestrator
//! is blocked on).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use agent_core::{AgentChunk, Orchestrator};
use agent_hitl::{AutoDenyHandler, HitlBridge, OutgoingEvent};
use agent_tools::AskHumanTool;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dto::{ChatRequest, RespondRequest, RespondResponse};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum SsePayload<'a> {
    TextDelta { text: &'a str },
    ReasoningDelta { text: &'a str },
    ToolResult { call_id: &'a str, tool_name: &'a str, output: &'a str, is_error: bool },
    Completion { final_text: &'a str, steps_taken: u32, stop_reason: agent_core::StopReason },
    ToolApprovalRequest(OutgoingEvent),
    HumanInputRequest(OutgoingEvent),
    Error { message: &'a str },
}

pub async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Result<impl IntoResponse, ApiError> {
    let thread_id = req.thread_id.clone();
    if state.memory.get_session(&thread_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("thread {thread_id}")));
    }
    let input = req
        .messages
        .last()
        .map(|m| m.content.clone())
        .ok_or_else(|| ApiError::BadRequest("messages must contain at least one entry".into()))?;

    let history = state.memory.get_messages(&thread_id).await?;

    let bridge = Arc::new(HitlBridge::default());
    state.register_bridge(&thread_id, bridge.clone());

    // The shared base registry carries a headless `ask_human` (auto-denies
    // with no one to ask); bind a fresh instance to this turn's live bridge
    // so `ask_human` calls actually reach the `/chat` stream that's waiting
    // on them, instead of being silently denied.
    let tools = Arc::new(state.tools.with_additional(AskHumanTool::new(bridge.clone())));

    let orchestrator = Arc::new(Orchestrator {
        agent_name: thread_id.clone(),
        model: state.model.clone(),
        tools,
        system_prompt: state.system_prompt.clone(),
        guardrails: state.guardrails.clone(),
        hooks: state.hooks.clone(),
        approval_handler: bridge.clone(),
        tools_requiring_approval: (*state.tools_requiring_approval).clone(),
        max_steps: state.max_steps,
    });

    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(64);
    let memory = state.memory.clone();
    let state_for_cleanup = state.clone();
    let thread_for_task = thread_id.clone();

    tokio::spawn(async move {
        let mut chunks = orchestrator.clone().stream(history, input);
        let mut final_result = None;

        loop {
            tokio::select! {
                chunk = chunks.next() => {
                    match chunk {
                        Some(AgentChunk::TextDelta(text)) => {
                            send(&tx, "text_delta", SsePayload::TextDelta { text: &text }).await;
                        }
                        Some(AgentChunk::ReasoningDelta(text)) => {
                            send(&tx, "reasoning_delta", SsePayload::ReasoningDelta { text: &text }).await;
                        }
                        Some(AgentChunk::ToolResult { call_id, tool_name, output, is_error }) => {
                            send(&tx, "tool_result", SsePayload::ToolResult {
                                call_id: &call_id, tool_name: &tool_name, output: &output, is_error,
                            }).await;
                        }
                        Some(AgentChunk::Completion(result)) => {
                            send(&tx, "completion", SsePayload::Completion {
                                final_text: &result.final_text,
                                steps_taken: result.steps_taken,
                                stop_reason: result.stop_reason,
                            }).await;
                            final_result = Some(result);
                        }
                        None => break,
                    }
                }
                event = bridge.next_event() => {
                    match event {
                        Some(ev @ OutgoingEvent::ToolApprovalRequest { .. }) => {
                            send(&tx, "tool_approval_request", SsePayload::ToolApprovalRequest(ev)).await;
                        }
                        Some(ev @ OutgoingEvent::HumanInputRequest { .. }) => {
                            send(&tx, "human_input_request", SsePayload::HumanInputRequest(ev)).await;
                        }
                        None => {}
                    }
                }
            }
        }

        if let Some(result) = final_result {
            if let Err(err) = memory.add_messages(&thread_for_task, result.messages).await {
                warn!(thread_id = %thread_for_task, error = %err, "failed to persist chat turn");
                send(&tx, "error", SsePayload::Error { message: "failed to persist conversation turn" }).await;
            }
        }

        state_for_cleanup.unregister_bridge(&thread_for_task);
        bridge.signal_done();
        let _ = tx.send(Event::default().data("[DONE]")).await;
        info!(thread_id = %thread_for_task, "chat turn finished");
    });

    let stream = tokio_stream::wrappers::ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

async fn send(tx: &tokio::sync::mpsc::Sender<Event>, event: &'static str, payload: SsePayload<'_>) {
    match serde_json::to_string(&payload) {
        Ok(json) => {
            let _ = tx.send(Event::default().event(event).data(json)).await;
        }
        Err(err) => warn!(error = %err, "failed to serialize SSE payload"),
    }
}

pub async fn respond(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(req): Json<RespondRequest>,
) -> Result<Json<RespondResponse>, ApiError> {
    let data: Value = req.data;
    if state.resolve_pending(request_id, data) {
        Ok(Json(RespondResponse { status: "ok" }))
    } else {
        Err(ApiError::NotFound(format!("no pending request {request_id}")))
    }
}

/// Used only when a thread's server-side auto-deny fallback is exercised
/// outside a live `/chat` stream (e.g. a batch job with no human reachable).
pub fn auto_deny_handler() -> Arc<AutoDenyHandler> {
    Arc::new(AutoDenyHandler)
}
