// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Streaming chunk kinds emitted by [`crate::orchestrator::Orchestrator::stream`]
//! and the aggregated result returned by both `run` and `stream`.

use std::collections::HashMap;

use agent_memory::Message;
use serde::{Deserialize, Serialize};

/// One unit of a streamed agent run.
#[derive(Debug, Clone)]
pub enum AgentChunk {
    /// A delta of the assistant's visible text output.
    TextDelta(String),
    /// A delta of the assistant's reasoning/thinking trace, when the model
    /// exposes one. Not part of the final text shown to the user.
    ReasoningDelta(String),
    /// A tool call has finished executing.
    ToolResult {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// The run has finished; carries the same value `run`/`stream` return.
    Completion(AgentRunResult),
}

/// Why the run loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model produced a final answer with no further tool calls.
    Stop,
    /// The configured step budget was exhausted with tool calls still pending.
    MaxStepsExceeded,
    /// An input or output guardrail tripped.
    GuardrailTripped,
    /// A tool call requiring approval was denied by the human reviewer.
    ApprovalDenied,
    /// The model call failed after exhausting its retry budget.
    ModelError,
}

/// Aggregated outcome of one `run`/`stream` call.
#[derive(Debug, Clone)]
pub struct AgentRunResult {
    pub final_text: String,
    pub messages: Vec<Message>,
    pub tool_calls_by_name: HashMap<String, usize>,
    pub steps_taken: u32,
    pub stop_reason: StopReason,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl AgentRunResult {
    pub fn record_tool_call(&mut self, name: &str) {
        *self.tool_calls_by_name.entry(name.to_string()).or_insert(0) += 1;
    }
}
