// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The ReAct orchestrator: think (call the model) / act (run a tool) / repeat
//! until the model stops requesting tools or the step budget runs out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use agent_guardrails::{GuardrailContext, GuardrailRunner, GuardrailType};
use agent_guardrails::{HookContext, HookEvent, HookRegistry};
use agent_hitl::{ApprovalHandler, ToolApprovalAction};
use agent_memory::{FinishReason, MediaContent, Message as MemMessage, ToolCallIntent, ToolResultContent, Usage as MemUsage};
use agent_model::{CompletionRequest, Message as ModelMessage, ModelProvider, ResponseEvent, ToolSchema as ModelToolSchema};
use agent_tools::{ToolCall, ToolRegistry};
use futures::StreamExt;
use rand::Rng as _;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::{AgentChunk, AgentRunResult, StopReason};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_FACTOR: u32 = 2;
const RETRY_CAP: Duration = Duration::from_secs(30);
const RETRY_JITTER_MS: i64 = 500;

#[derive(thiserror::Error, Debug)]
pub enum OrchestratorError {
    #[error("model call failed after {0} attempts: {1}")]
    ModelExhausted(u32, anyhow::Error),
    #[error(transparent)]
    Guardrail(#[from] anyhow::Error),
}

/// Everything the orchestrator needs to run one agent: the model, the tools
/// it may call, and the ambient guardrail/hook/approval wiring.
pub struct Orchestrator {
    pub agent_name: String,
    pub model: Arc<dyn ModelProvider>,
    pub tools: Arc<ToolRegistry>,
    pub system_prompt: String,
    pub guardrails: Option<Arc<GuardrailRunner>>,
    pub hooks: Arc<HookRegistry>,
    pub approval_handler: Arc<dyn ApprovalHandler>,
    pub tools_requiring_approval: HashSet<String>,
    pub max_steps: u32,
}

impl Orchestrator {
    /// Run to completion, returning the aggregated result. `history` is the
    /// conversation so far (without the new user turn); `input` is the new
    /// user message.
    pub async fn run(&self, history: Vec<MemMessage>, input: &str) -> Result<AgentRunResult, OrchestratorError> {
        let mut sink = DiscardingSink;
        self.drive(history, input, &mut sink).await
    }

    /// Run to completion, emitting [`AgentChunk`]s as they happen. Returns a
    /// receiver the caller can forward over SSE or collect.
    pub fn stream(self: Arc<Self>, history: Vec<MemMessage>, input: String) -> ReceiverStream<AgentChunk> {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        tokio::spawn(async move {
            let mut sink = ChannelSink { tx: tx.clone() };
            let result = self.drive(history, &input, &mut sink).await;
            match result {
                Ok(result) => {
                    let _ = tx.send(AgentChunk::Completion(result)).await;
                }
                Err(e) => {
                    warn!(error = %e, "agent run failed");
                }
            }
        });
        ReceiverStream::new(rx)
    }

    async fn drive(&self, history: Vec<MemMessage>, input: &str, sink: &mut dyn Sink) -> Result<AgentRunResult, OrchestratorError> {
        let run_id = Uuid::new_v4().to_string();
        let mut hook_ctx = HookContext::new();
        hook_ctx.insert("run_id".into(), Value::String(run_id.clone()));
        hook_ctx.insert("agent_name".into(), Value::String(self.agent_name.clone()));
        self.hooks.dispatch(HookEvent::RunStart, hook_ctx.clone()).await;

        let mut result = AgentRunResult {
            final_text: String::new(),
            messages: Vec::new(),
            tool_calls_by_name: HashMap::new(),
            steps_taken: 0,
            stop_reason: StopReason::Stop,
            input_tokens: 0,
            output_tokens: 0,
        };

        if let Some(guardrails) = &self.guardrails {
            let ctx = GuardrailContext { agent_name: self.agent_name.clone(), run_id: run_id.clone(), input_text: Some(input.to_string()), ..Default::default() };
            let checks = guardrails.run(GuardrailType::Input, &ctx).await;
            if GuardrailRunner::any_tripwire(&checks) {
                self.hooks.dispatch(HookEvent::GuardrailTrip, hook_ctx.clone()).await;
                result.stop_reason = StopReason::GuardrailTripped;
                result.final_text = "Your message was blocked by an input guardrail.".to_string();
                self.hooks.dispatch(HookEvent::RunEnd, hook_ctx).await;
                return Ok(result);
            }
        }

        let mut transcript = history;
        let user_msg = MemMessage::user_text(input.to_string());
        transcript.push(user_msg.clone());
        result.messages.push(user_msg);

        for step in 0..self.max_steps {
            result.steps_taken = step + 1;
            let mut step_ctx = hook_ctx.clone();
            step_ctx.insert("step".into(), Value::from(step));
            self.hooks.dispatch(HookEvent::StepStart, step_ctx.clone()).await;

            let request = self.build_request(&transcript);
            self.hooks.dispatch(HookEvent::LlmStart, step_ctx.clone()).await;
            let (text, reasoning, tool_calls, usage) = self.call_model_with_retry(request, sink).await?;
            self.hooks.dispatch(HookEvent::LlmEnd, step_ctx.clone()).await;

            result.input_tokens += usage.0;
            result.output_tokens += usage.1;
            if !reasoning.is_empty() {
                sink.emit(AgentChunk::ReasoningDelta(reasoning.clone())).await;
            }

            let detected = if tool_calls.is_empty() { detect_tool(&text, &self.tools.schemas()) } else { None };
            let effective_calls: Vec<ToolCall> = if !tool_calls.is_empty() {
                tool_calls
            } else if let Some((name, args)) = detected {
                vec![ToolCall { id: Uuid::new_v4().to_string(), name, args }]
            } else {
                Vec::new()
            };

            if effective_calls.is_empty() {
                let assistant = MemMessage::Assistant {
                    id: Uuid::new_v4(),
                    reasoning: if reasoning.is_empty() { None } else { Some(reasoning) },
                    content: vec![MediaContent::Text { text: text.clone() }],
                    tool_calls: vec![],
                    finish_reason: FinishReason::Stop,
                    usage: MemUsage { input_tokens: usage.0, output_tokens: usage.1, total_tokens: usage.0 + usage.1 },
                };
                transcript.push(assistant.clone());
                result.messages.push(assistant);

                if let Some(guardrails) = &self.guardrails {
                    let ctx = GuardrailContext { agent_name: self.agent_name.clone(), run_id: run_id.clone(), output_text: Some(text.clone()), ..Default::default() };
                    let checks = guardrails.run(GuardrailType::Output, &ctx).await;
                    if GuardrailRunner::any_tripwire(&checks) {
                        self.hooks.dispatch(HookEvent::GuardrailTrip, hook_ctx.clone()).await;
                        result.stop_reason = StopReason::GuardrailTripped;
                        result.final_text = "The response was blocked by an output guardrail.".to_string();
                        self.hooks.dispatch(HookEvent::StepEnd, step_ctx).await;
                        self.hooks.dispatch(HookEvent::RunEnd, hook_ctx).await;
                        return Ok(result);
                    }
                }

                sink.emit(AgentChunk::TextDelta(text.clone())).await;
                result.final_text = text;
                result.stop_reason = StopReason::Stop;
                self.hooks.dispatch(HookEvent::StepEnd, step_ctx).await;
                break;
            }

            let assistant = MemMessage::Assistant {
                id: Uuid::new_v4(),
                reasoning: None,
                content: if text.is_empty() { vec![] } else { vec![MediaContent::Text { text: text.clone() }] },
                tool_calls: effective_calls
                    .iter()
                    .map(|c| ToolCallIntent { id: c.id.clone(), name: c.name.clone(), arguments: c.args.clone() })
                    .collect(),
                finish_reason: FinishReason::ToolCalls,
                usage: MemUsage { input_tokens: usage.0, output_tokens: usage.1, total_tokens: usage.0 + usage.1 },
            };
            transcript.push(assistant.clone());
            result.messages.push(assistant);

            for call in &effective_calls {
                result.record_tool_call(&call.name);
                self.hooks.dispatch(HookEvent::ToolStart, step_ctx.clone()).await;

                if let Some(guardrails) = &self.guardrails {
                    let ctx = GuardrailContext {
                        agent_name: self.agent_name.clone(),
                        run_id: run_id.clone(),
                        tool_name: Some(call.name.clone()),
                        tool_arguments: Some(call.args.clone()),
                        ..Default::default()
                    };
                    let checks = guardrails.run(GuardrailType::ToolCall, &ctx).await;
                    if GuardrailRunner::any_tripwire(&checks) {
                        self.hooks.dispatch(HookEvent::GuardrailTrip, hook_ctx.clone()).await;
                        let denial = tool_result_message(&call.id, "tool call blocked by guardrail", true);
                        transcript.push(denial.clone());
                        result.messages.push(denial);
                        continue;
                    }
                }

                if self.tools_requiring_approval.contains(&call.name) {
                    let approval = self.approval_handler.request_approval(&call.name, &call.id, call.args.clone(), None).await;
                    if approval.action == ToolApprovalAction::Deny {
                        result.stop_reason = StopReason::ApprovalDenied;
                        let denial = tool_result_message(&call.id, approval.reason.as_deref().unwrap_or("denied by reviewer"), true);
                        transcript.push(denial.clone());
                        result.messages.push(denial);
                        sink.emit(AgentChunk::ToolResult { call_id: call.id.clone(), tool_name: call.name.clone(), output: "denied".into(), is_error: true }).await;
                        continue;
                    }
                }

                let output = self.tools.execute(call).await;
                sink.emit(AgentChunk::ToolResult { call_id: call.id.clone(), tool_name: call.name.clone(), output: output.content.clone(), is_error: output.is_error }).await;
                let tool_msg = tool_result_message(&call.id, &output.content, output.is_error);
                transcript.push(tool_msg.clone());
                result.messages.push(tool_msg);
                self.hooks.dispatch(HookEvent::ToolEnd, step_ctx.clone()).await;
            }

            self.hooks.dispatch(HookEvent::StepEnd, step_ctx).await;
        }

        if result.final_text.is_empty() && result.stop_reason == StopReason::Stop {
            result.stop_reason = StopReason::MaxStepsExceeded;
        }
        self.hooks.dispatch(HookEvent::RunEnd, hook_ctx).await;
        Ok(result)
    }

    fn build_request(&self, transcript: &[MemMessage]) -> CompletionRequest {
        let mut messages = vec![ModelMessage::system(self.system_prompt.clone())];
        messages.extend(transcript.iter().map(to_model_message));
        let tools = self
            .tools
            .schemas()
            .into_iter()
            .map(|s| ModelToolSchema { name: s.name, description: s.description, parameters: s.parameters })
            .collect();
        CompletionRequest { messages, tools, stream: true, system_dynamic_suffix: None }
    }

    async fn call_model_with_retry(&self, request: CompletionRequest, sink: &mut dyn Sink) -> Result<(String, String, Vec<ToolCall>, (u32, u32)), OrchestratorError> {
        let mut last_err = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            match self.call_model_once(request.clone(), sink).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(attempt, error = %e, "model call failed");
                    last_err = Some(e);
                    if attempt < RETRY_ATTEMPTS {
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                }
            }
        }
        Err(OrchestratorError::ModelExhausted(RETRY_ATTEMPTS + 1, last_err.unwrap_or_else(|| anyhow::anyhow!("unknown model error"))))
    }

    async fn call_model_once(&self, request: CompletionRequest, sink: &mut dyn Sink) -> anyhow::Result<(String, String, Vec<ToolCall>, (u32, u32))> {
        let mut stream = self.model.complete(request).await?;
        let mut text = String::new();
        let mut reasoning = String::new();
        let mut tool_calls: HashMap<String, (String, String)> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut usage = (0u32, 0u32);

        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(delta) => {
                    sink.emit(AgentChunk::TextDelta(delta.clone())).await;
                    text.push_str(&delta);
                }
                ResponseEvent::ThinkingDelta(delta) => {
                    sink.emit(AgentChunk::ReasoningDelta(delta.clone())).await;
                    reasoning.push_str(&delta);
                }
                ResponseEvent::ToolCall { id, name, arguments } => {
                    if !tool_calls.contains_key(&id) {
                        order.push(id.clone());
                    }
                    let entry = tool_calls.entry(id).or_insert((name, String::new()));
                    entry.1.push_str(&arguments);
                }
                ResponseEvent::Usage { input_tokens, output_tokens, .. } => {
                    usage = (input_tokens, output_tokens);
                }
                ResponseEvent::Done => break,
                ResponseEvent::Error(msg) => return Err(anyhow::anyhow!(msg)),
            }
        }

        let calls = order
            .into_iter()
            .filter_map(|id| {
                let (name, args_raw) = tool_calls.remove(&id)?;
                let args = serde_json::from_str(&args_raw).unwrap_or(Value::Object(Default::default()));
                Some(ToolCall { id, name, args })
            })
            .collect();

        Ok((text, reasoning, calls, usage))
    }
}

fn tool_result_message(call_id: &str, text: &str, is_error: bool) -> MemMessage {
    MemMessage::ToolResult {
        id: Uuid::new_v4(),
        call_id: call_id.to_string(),
        content: vec![ToolResultContent::Text { text: text.to_string() }],
        is_error,
    }
}

fn to_model_message(m: &MemMessage) -> ModelMessage {
    match m {
        MemMessage::System { text, .. } => ModelMessage::system(text.clone()),
        MemMessage::User { content, .. } => {
            let text = content
                .iter()
                .filter_map(|c| match c {
                    MediaContent::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            ModelMessage::user(text)
        }
        MemMessage::Assistant { content, .. } => {
            let text = content
                .iter()
                .filter_map(|c| match c {
                    MediaContent::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            ModelMessage::assistant(text)
        }
        MemMessage::ToolCall { .. } => ModelMessage::assistant(String::new()),
        MemMessage::ToolResult { call_id, content, .. } => {
            let text = content
                .iter()
                .filter_map(|c| match c {
                    ToolResultContent::Text { text } => Some(text.as_str()),
                    ToolResultContent::Error { message } => Some(message.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            ModelMessage::tool_result(call_id.clone(), text)
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = RETRY_BASE.as_millis() as u64 * RETRY_FACTOR.pow(attempt) as u64;
    let capped = exp.min(RETRY_CAP.as_millis() as u64);
    let jitter: i64 = rand::thread_rng().gen_range(-RETRY_JITTER_MS..=RETRY_JITTER_MS);
    let total = (capped as i64 + jitter).max(0) as u64;
    Duration::from_millis(total)
}

/// Pure best-effort mapping of a raw JSON object the model emitted as plain
/// text onto one of the registered tools, for adapters that return tool
/// arguments as free-form JSON instead of a native tool-call event.
///
/// The whole text must parse as a JSON object. Each tool is scored by the
/// size of the intersection between the object's keys and that tool's
/// declared parameter names (from its JSON-schema `properties`); the tool
/// with the largest intersection wins. With exactly one tool registered and
/// no intersection-based candidate, that tool is chosen unconditionally.
pub fn detect_tool(text: &str, tools: &[agent_tools::registry::ToolSchema]) -> Option<(String, Value)> {
    if tools.is_empty() {
        return None;
    }
    let parsed: Value = serde_json::from_str(text).ok()?;
    let obj = parsed.as_object()?;
    let parsed_keys: HashSet<String> = obj.keys().cloned().collect();

    let mut candidates: Vec<(&agent_tools::registry::ToolSchema, usize)> = Vec::new();
    for tool in tools {
        let param_keys = schema_property_keys(&tool.parameters);
        if param_keys.is_empty() {
            continue;
        }
        let intersection = parsed_keys.intersection(&param_keys).count();
        if intersection > 0 || parsed_keys.is_subset(&param_keys) {
            candidates.push((tool, intersection));
        }
    }

    let chosen = if candidates.is_empty() {
        if tools.len() == 1 {
            Some(&tools[0])
        } else {
            None
        }
    } else {
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        Some(candidates[0].0)
    };

    chosen.map(|tool| (tool.name.clone(), parsed.clone()))
}

fn schema_property_keys(schema: &Value) -> HashSet<String> {
    schema
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default()
}

#[async_trait::async_trait]
trait Sink: Send {
    async fn emit(&mut self, chunk: AgentChunk);
}

struct DiscardingSink;
#[async_trait::async_trait]
impl Sink for DiscardingSink {
    async fn emit(&mut self, _chunk: AgentChunk) {}
}

struct ChannelSink {
    tx: tokio::sync::mpsc::Sender<AgentChunk>,
}
#[async_trait::async_trait]
impl Sink for ChannelSink {
    async fn emit(&mut self, chunk: AgentChunk) {
        let _ = self.tx.send(chunk).await;
    }
}
