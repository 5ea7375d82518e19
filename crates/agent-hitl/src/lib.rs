// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Human-in-the-loop rendezvous bridge: couples the orchestrator's blocking
//! approval/input calls to an asynchronous HTTP/SSE transport.

mod bridge;
mod types;

pub use bridge::{HitlBridge, DEFAULT_RESPONSE_TIMEOUT_SECS};
pub use types::{
    HumanInputRequest, HumanInputResponse, InputOption, OutgoingEvent, ToolApprovalAction,
    ToolApprovalRequest, ToolApprovalResponse,
};

use async_trait::async_trait;
use std::sync::Arc;

/// Handler the orchestrator calls before executing a tool in
/// `tools_requiring_approval`. Implemented by [`HitlBridge`] for the HTTP
/// path; tests may supply an auto-approve/deny stub.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request_approval(
        &self,
        tool_name: &str,
        call_id: &str,
        arguments: serde_json::Value,
        context: Option<String>,
    ) -> ToolApprovalResponse;
}

#[async_trait]
impl ApprovalHandler for HitlBridge {
    async fn request_approval(
        &self,
        tool_name: &str,
        call_id: &str,
        arguments: serde_json::Value,
        context: Option<String>,
    ) -> ToolApprovalResponse {
        HitlBridge::request_approval(self, tool_name, call_id, arguments, context).await
    }
}

/// Handler the `ask_human` tool calls to pose a question to the user.
#[async_trait]
pub trait HumanInputHandler: Send + Sync {
    async fn request_input(
        &self,
        question: &str,
        context: Option<String>,
        options: Vec<InputOption>,
        allow_freeform: bool,
    ) -> HumanInputResponse;
}

#[async_trait]
impl HumanInputHandler for HitlBridge {
    async fn request_input(
        &self,
        question: &str,
        context: Option<String>,
        options: Vec<InputOption>,
        allow_freeform: bool,
    ) -> HumanInputResponse {
        HitlBridge::request_human_input(self, question, context, options, allow_freeform).await
    }
}

/// Handler that denies (for approvals) / times-out (for input) every request
/// without going through any transport. Used where no bridge is wired up.
pub struct AutoDenyHandler;

#[async_trait]
impl ApprovalHandler for AutoDenyHandler {
    async fn request_approval(
        &self,
        _tool_name: &str,
        _call_id: &str,
        _arguments: serde_json::Value,
        _context: Option<String>,
    ) -> ToolApprovalResponse {
        ToolApprovalResponse {
            request_id: uuid::Uuid::new_v4(),
            action: ToolApprovalAction::Deny,
            modified_arguments: None,
            reason: Some("no approval handler configured".into()),
        }
    }
}

#[async_trait]
impl HumanInputHandler for AutoDenyHandler {
    async fn request_input(
        &self,
        _question: &str,
        _context: Option<String>,
        _options: Vec<InputOption>,
        _allow_freeform: bool,
    ) -> HumanInputResponse {
        HumanInputResponse {
            request_id: uuid::Uuid::new_v4(),
            selected_key: None,
            selected_label: None,
            freeform_text: None,
            timed_out: true,
        }
    }
}

/// Convenience alias used by callers that hold a bridge behind an `Arc` and
/// want to pass it as both handler traits simultaneously.
pub type SharedBridge = Arc<HitlBridge>;
