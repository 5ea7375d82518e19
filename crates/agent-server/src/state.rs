// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use agent_guardrails::{GuardrailRunner, HookRegistry};
use agent_hitl::HitlBridge;
use agent_memory::SessionManager;
use agent_model::ModelProvider;
use agent_tools::ToolRegistry;
use uuid::Uuid;

use crate::dto::Feedback;

/// Everything a request handler needs, shared behind `Arc` clones.
#[derive(Clone)]
pub struct AppState {
    pub memory: Arc<SessionManager>,
    pub model: Arc<dyn ModelProvider>,
    pub tools: Arc<ToolRegistry>,
    pub guardrails: Option<Arc<GuardrailRunner>>,
    pub hooks: Arc<HookRegistry>,
    pub system_prompt: String,
    pub max_steps: u32,
    pub tools_requiring_approval: Arc<std::collections::HashSet<String>>,
    /// HITL bridges for threads with an in-flight `/chat` stream, keyed by
    /// thread id. `/chat/respond/{request_id}` doesn't know which thread a
    /// request_id belongs to, so it tries every active bridge — request ids
    /// are globally unique UUIDs, so at most one bridge will claim it.
    pub active_bridges: Arc<Mutex<HashMap<String, Arc<HitlBridge>>>>,
    pub feedback: Arc<Mutex<Vec<Feedback>>>,
}

impl AppState {
    pub fn register_bridge(&self, thread_id: &str, bridge: Arc<HitlBridge>) {
        self.active_bridges.lock().unwrap().insert(thread_id.to_string(), bridge);
    }

    pub fn unregister_bridge(&self, thread_id: &str) {
        self.active_bridges.lock().unwrap().remove(thread_id);
    }

    /// Resolve a pending HITL request by trying every thread with an active
    /// stream. Returns `true` if some bridge claimed the request.
    pub fn resolve_pending(&self, request_id: Uuid, data: serde_json::Value) -> bool {
        let bridges: Vec<Arc<HitlBridge>> = self.active_bridges.lock().unwrap().values().cloned().collect();
        bridges.iter().any(|b| b.resolve(request_id, data.clone()))
    }
}
