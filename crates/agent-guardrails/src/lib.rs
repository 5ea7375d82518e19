// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Guardrail and hook contracts run by the orchestrator at input, output, and
//! tool-call interception points (integration-level only — the guardrail
//! catalog itself is out of scope here).

mod hooks;
pub mod prebuilt;

pub use hooks::{HookContext, HookEvent, HookRegistry};

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// When in the run loop a guardrail fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailType {
    Input,
    Output,
    ToolCall,
}

/// Read-only snapshot passed to a guardrail check. Carries at most one of
/// input text, output text, or tool name+arguments depending on `kind`.
#[derive(Debug, Clone, Default)]
pub struct GuardrailContext {
    pub agent_name: String,
    pub run_id: String,
    pub input_text: Option<String>,
    pub output_text: Option<String>,
    pub tool_name: Option<String>,
    pub tool_arguments: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub guardrail_name: String,
    pub guardrail_type: GuardrailType,
    pub passed: bool,
    pub tripwire: bool,
    pub message: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl GuardrailResult {
    pub fn pass(name: impl Into<String>, kind: GuardrailType) -> Self {
        Self {
            guardrail_name: name.into(),
            guardrail_type: kind,
            passed: true,
            tripwire: false,
            message: String::new(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn fail(name: impl Into<String>, kind: GuardrailType, message: impl Into<String>) -> Self {
        Self {
            guardrail_name: name.into(),
            guardrail_type: kind,
            passed: false,
            tripwire: false,
            message: message.into(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn trip(name: impl Into<String>, kind: GuardrailType, message: impl Into<String>) -> Self {
        Self {
            guardrail_name: name.into(),
            guardrail_type: kind,
            passed: false,
            tripwire: true,
            message: message.into(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }
}

/// A single async check. Implementations must never leave the run hung — the
/// runner treats an internal error (panic or `anyhow::Error`) as a pass
/// (fail-open) so a broken check cannot produce a false hard stop.
#[async_trait]
pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;
    fn guardrail_type(&self) -> GuardrailType;
    async fn check(&self, ctx: &GuardrailContext) -> anyhow::Result<GuardrailResult>;
}

/// Runs a set of guardrails of the same type in parallel and collects results.
pub struct GuardrailRunner {
    guardrails: Vec<Box<dyn Guardrail>>,
}

impl GuardrailRunner {
    pub fn new(guardrails: Vec<Box<dyn Guardrail>>) -> Self {
        Self { guardrails }
    }

    /// Run every registered guardrail of `kind` against `ctx` in parallel.
    /// A guardrail whose check errors or panics is reported as `passed=true`
    /// (fail-open) with the error text captured in `message`.
    pub async fn run(&self, kind: GuardrailType, ctx: &GuardrailContext) -> Vec<GuardrailResult> {
        let applicable: Vec<&Box<dyn Guardrail>> = self
            .guardrails
            .iter()
            .filter(|g| g.guardrail_type() == kind)
            .collect();

        let futures = applicable.iter().map(|g| {
            let name = g.name().to_string();
            async move {
                let result = AssertUnwindSafe(g.check(ctx)).catch_unwind().await;
                match result {
                    Ok(Ok(res)) => res,
                    Ok(Err(err)) => {
                        warn!(guardrail = %name, error = %err, "guardrail check errored — failing open");
                        GuardrailResult::pass(name, kind)
                    }
                    Err(_) => {
                        warn!(guardrail = %name, "guardrail check panicked — failing open");
                        GuardrailResult::pass(name, kind)
                    }
                }
            }
        });

        futures::future::join_all(futures).await
    }

    /// `true` if any result in `results` is a tripwire.
    pub fn any_tripwire(results: &[GuardrailResult]) -> bool {
        results.iter().any(|r| r.tripwire)
    }
}
