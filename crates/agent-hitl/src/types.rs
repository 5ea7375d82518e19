// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Action the user took on a tool-approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolApprovalAction {
    Approve,
    Deny,
    Modify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolApprovalRequest {
    pub request_id: Uuid,
    pub tool_name: String,
    pub call_id: String,
    pub arguments: Value,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolApprovalResponse {
    pub request_id: Uuid,
    pub action: ToolApprovalAction,
    #[serde(default)]
    pub modified_arguments: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputOption {
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanInputRequest {
    pub request_id: Uuid,
    pub question: String,
    pub context: Option<String>,
    #[serde(default)]
    pub options: Vec<InputOption>,
    pub allow_freeform: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanInputResponse {
    pub request_id: Uuid,
    #[serde(default)]
    pub selected_key: Option<String>,
    #[serde(default)]
    pub selected_label: Option<String>,
    #[serde(default)]
    pub freeform_text: Option<String>,
    #[serde(default)]
    pub timed_out: bool,
}

/// Event pushed onto the outgoing (agent → SSE) queue. Tagged so it serializes
/// directly as an SSE `event:`/`data:` payload kind (§6 of the platform spec).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingEvent {
    ToolApprovalRequest {
        request_id: Uuid,
        tool_name: String,
        call_id: String,
        arguments: Value,
        context: Option<String>,
    },
    HumanInputRequest {
        request_id: Uuid,
        question: String,
        context: Option<String>,
        options: Vec<InputOption>,
        allow_freeform: bool,
    },
}
