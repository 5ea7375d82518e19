// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The `ask_human` tool: the model's only sanctioned way to pause a run and
//! rendezvous with a person. Arguments map directly onto
//! `agent_hitl::HumanInputRequest` — this tool is a thin adapter, not a
//! second implementation of the rendezvous.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use agent_hitl::{AutoDenyHandler, HumanInputHandler, InputOption};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Default cap on how many times a single run may invoke `ask_human` before
/// the tool starts refusing — a runaway loop asking the same question
/// repeatedly should fail the run, not wait forever on a person.
pub const DEFAULT_MAX_REQUESTS_PER_RUN: usize = 10;

pub struct AskHumanTool {
    handler: Arc<dyn HumanInputHandler>,
    max_requests_per_run: usize,
    requests_made: AtomicUsize,
}

impl AskHumanTool {
    pub fn new(handler: Arc<dyn HumanInputHandler>) -> Self {
        Self {
            handler,
            max_requests_per_run: DEFAULT_MAX_REQUESTS_PER_RUN,
            requests_made: AtomicUsize::new(0),
        }
    }

    pub fn with_max_requests(handler: Arc<dyn HumanInputHandler>, max_requests_per_run: usize) -> Self {
        Self {
            handler,
            max_requests_per_run,
            requests_made: AtomicUsize::new(0),
        }
    }

    /// An instance with no bridge wired up: every request is denied/timed
    /// out immediately. Used in tests and in contexts with no HITL channel.
    pub fn new_headless() -> Self {
        Self::new(Arc::new(AutoDenyHandler))
    }

    /// Reset the per-run request counter. Call at the start of each new run.
    pub fn reset(&self) {
        self.requests_made.store(0, Ordering::SeqCst);
    }

    pub fn requests_made(&self) -> usize {
        self.requests_made.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for AskHumanTool {
    fn name(&self) -> &str {
        "ask_human"
    }

    fn description(&self) -> &str {
        "Ask a person a question and wait for their reply before continuing.\n\
         Offer `options` when the answer is a choice among known alternatives;\n\
         set `allow_freeform` to also accept arbitrary text. If nobody responds\n\
         within the configured timeout the request is treated as declined."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question to show the person"
                },
                "context": {
                    "type": "string",
                    "description": "Optional extra context to display alongside the question"
                },
                "options": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "key": { "type": "string" },
                            "label": { "type": "string" },
                            "description": { "type": "string" }
                        },
                        "required": ["key", "label"],
                        "additionalProperties": false
                    },
                    "description": "Choices to present, if any"
                },
                "allow_freeform": {
                    "type": "boolean",
                    "description": "Whether free-text replies are accepted in addition to `options`",
                    "default": false
                }
            },
            "required": ["question"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let made = self.requests_made.fetch_add(1, Ordering::SeqCst);
        if made >= self.max_requests_per_run {
            return ToolOutput::err(
                &call.id,
                format!(
                    "ask_human has already been used {made} times this run (limit {}); \
                     proceed with your best judgement instead of asking again",
                    self.max_requests_per_run
                ),
            );
        }

        let question = match call.args.get("question").and_then(|v| v.as_str()) {
            Some(q) => q.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'question'"),
        };
        let context = call
            .args
            .get("context")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let allow_freeform = call
            .args
            .get("allow_freeform")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let mut options = Vec::new();
        if let Some(arr) = call.args.get("options").and_then(|v| v.as_array()) {
            for (i, opt) in arr.iter().enumerate() {
                let key = match opt.get("key").and_then(|v| v.as_str()) {
                    Some(k) => k.to_string(),
                    None => {
                        return ToolOutput::err(&call.id, format!("option {} missing 'key'", i + 1))
                    }
                };
                let label = match opt.get("label").and_then(|v| v.as_str()) {
                    Some(l) => l.to_string(),
                    None => {
                        return ToolOutput::err(&call.id, format!("option {} missing 'label'", i + 1))
                    }
                };
                let description = opt
                    .get("description")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                options.push(InputOption {
                    key,
                    label,
                    description,
                });
            }
        }

        if options.is_empty() && !allow_freeform {
            return ToolOutput::err(
                &call.id,
                "must provide at least one option, or set allow_freeform=true",
            );
        }

        debug!(question = %question, options = options.len(), "ask_human tool");

        let response = self
            .handler
            .request_input(&question, context, options, allow_freeform)
            .await;

        if response.timed_out {
            return ToolOutput::err(
                &call.id,
                "no response was received in time; proceed with your best judgement and state your assumptions",
            );
        }

        let answer = match (response.selected_label, response.freeform_text) {
            (Some(label), Some(text)) if !text.is_empty() => format!("{label}: {text}"),
            (Some(label), _) => label,
            (None, Some(text)) => text,
            (None, None) => "(no answer provided)".to_string(),
        };

        ToolOutput::ok(&call.id, answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_hitl::{HitlBridge, HumanInputResponse};
    use serde_json::json;
    use std::time::Duration;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "1".into(),
            name: "ask_human".into(),
            args,
        }
    }

    #[tokio::test]
    async fn missing_question_is_error() {
        let t = AskHumanTool::new_headless();
        let out = t.execute(&call(json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("missing 'question'"));
    }

    #[tokio::test]
    async fn no_options_and_no_freeform_is_error() {
        let t = AskHumanTool::new_headless();
        let out = t.execute(&call(json!({"question": "continue?"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("allow_freeform"));
    }

    #[tokio::test]
    async fn headless_handler_times_out() {
        let t = AskHumanTool::new_headless();
        let out = t
            .execute(&call(json!({"question": "continue?", "allow_freeform": true})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("no response"));
    }

    #[tokio::test]
    async fn exceeding_max_requests_refuses_without_asking() {
        let t = AskHumanTool::with_max_requests(Arc::new(AutoDenyHandler), 1);
        let first = t
            .execute(&call(json!({"question": "q1", "allow_freeform": true})))
            .await;
        assert!(first.is_error); // denied by AutoDenyHandler
        let second = t
            .execute(&call(json!({"question": "q2", "allow_freeform": true})))
            .await;
        assert!(second.content.contains("already been used"));
    }

    #[tokio::test]
    async fn reset_clears_the_request_counter() {
        let t = AskHumanTool::with_max_requests(Arc::new(AutoDenyHandler), 1);
        t.execute(&call(json!({"question": "q1", "allow_freeform": true})))
            .await;
        t.reset();
        assert_eq!(t.requests_made(), 0);
    }

    #[tokio::test]
    async fn resolved_option_answer_round_trips_through_bridge() {
        let bridge = Arc::new(HitlBridge::new(Duration::from_secs(5)));
        let t = AskHumanTool::new(bridge.clone());

        let bridge2 = bridge.clone();
        let asker = tokio::spawn(async move {
            t.execute(&call(json!({
                "question": "pick one",
                "options": [{"key": "a", "label": "Option A"}],
            })))
            .await
        });

        let event = bridge2.next_event().await.expect("expected an event");
        let request_id = match event {
            agent_hitl::OutgoingEvent::HumanInputRequest { request_id, .. } => request_id,
            _ => panic!("expected a human input request"),
        };
        bridge2.resolve(
            request_id,
            serde_json::to_value(HumanInputResponse {
                request_id,
                selected_key: Some("a".into()),
                selected_label: Some("Option A".into()),
                freeform_text: None,
                timed_out: false,
            })
            .unwrap(),
        );

        let out = asker.await.unwrap();
        assert!(!out.is_error);
        assert_eq!(out.content, "Option A");
    }
}
