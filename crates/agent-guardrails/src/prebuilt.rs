// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Ready-to-register guardrails covering the common cases: a keyword
//! blocklist, a length ceiling, and JSON-schema validation of tool
//! arguments.

use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::Value;

use crate::{Guardrail, GuardrailContext, GuardrailResult, GuardrailType};

/// Trips when input or output text contains any of a configured set of
/// blocked substrings (case-insensitive).
pub struct KeywordBlocklistGuardrail {
    name: String,
    guardrail_type: GuardrailType,
    blocked: Vec<String>,
}

impl KeywordBlocklistGuardrail {
    pub fn new(guardrail_type: GuardrailType, blocked: Vec<String>) -> Self {
        let name = match guardrail_type {
            GuardrailType::Input => "keyword_blocklist_input",
            GuardrailType::Output => "keyword_blocklist_output",
            GuardrailType::ToolCall => "keyword_blocklist_tool_call",
        };
        Self {
            name: name.to_string(),
            guardrail_type,
            blocked: blocked.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl Guardrail for KeywordBlocklistGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    fn guardrail_type(&self) -> GuardrailType {
        self.guardrail_type
    }

    async fn check(&self, ctx: &GuardrailContext) -> anyhow::Result<GuardrailResult> {
        let text = match self.guardrail_type {
            GuardrailType::Input => ctx.input_text.as_deref(),
            GuardrailType::Output => ctx.output_text.as_deref(),
            GuardrailType::ToolCall => ctx.tool_name.as_deref(),
        }
        .unwrap_or("")
        .to_lowercase();

        for blocked in &self.blocked {
            if text.contains(blocked.as_str()) {
                return Ok(GuardrailResult::trip(self.name(), self.guardrail_type, format!("blocked keyword matched: {blocked}")));
            }
        }
        Ok(GuardrailResult::pass(self.name(), self.guardrail_type))
    }
}

/// Trips when input or output text exceeds a configured character ceiling.
pub struct MaxLengthGuardrail {
    name: String,
    guardrail_type: GuardrailType,
    max_chars: usize,
}

impl MaxLengthGuardrail {
    pub fn new(guardrail_type: GuardrailType, max_chars: usize) -> Self {
        let name = match guardrail_type {
            GuardrailType::Input => "max_length_input",
            GuardrailType::Output => "max_length_output",
            GuardrailType::ToolCall => "max_length_tool_call",
        };
        Self { name: name.to_string(), guardrail_type, max_chars }
    }
}

#[async_trait]
impl Guardrail for MaxLengthGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    fn guardrail_type(&self) -> GuardrailType {
        self.guardrail_type
    }

    async fn check(&self, ctx: &GuardrailContext) -> anyhow::Result<GuardrailResult> {
        let text = match self.guardrail_type {
            GuardrailType::Input => ctx.input_text.clone().unwrap_or_default(),
            GuardrailType::Output => ctx.output_text.clone().unwrap_or_default(),
            GuardrailType::ToolCall => ctx
                .tool_arguments
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default(),
        };

        if text.chars().count() > self.max_chars {
            return Ok(GuardrailResult::trip(self.name(), self.guardrail_type, format!("text exceeds {} characters", self.max_chars)));
        }
        Ok(GuardrailResult::pass(self.name(), self.guardrail_type))
    }
}

/// Validates a tool call's arguments against a JSON Schema, tripping on a
/// shape mismatch so a malformed call never reaches the tool's `execute`.
pub struct ToolArgumentSchemaGuardrail {
    tool_name: String,
    schema: JSONSchema,
}

impl ToolArgumentSchemaGuardrail {
    pub fn new(tool_name: impl Into<String>, schema: &Value) -> anyhow::Result<Self> {
        let compiled = JSONSchema::compile(schema).map_err(|e| anyhow::anyhow!("invalid tool argument schema: {e}"))?;
        Ok(Self { tool_name: tool_name.into(), schema: compiled })
    }
}

#[async_trait]
impl Guardrail for ToolArgumentSchemaGuardrail {
    fn name(&self) -> &str {
        "tool_argument_schema"
    }

    fn guardrail_type(&self) -> GuardrailType {
        GuardrailType::ToolCall
    }

    async fn check(&self, ctx: &GuardrailContext) -> anyhow::Result<GuardrailResult> {
        if ctx.tool_name.as_deref() != Some(self.tool_name.as_str()) {
            return Ok(GuardrailResult::pass(self.name(), self.guardrail_type()));
        }
        let arguments = ctx.tool_arguments.clone().unwrap_or(Value::Null);
        match self.schema.validate(&arguments) {
            Ok(()) => Ok(GuardrailResult::pass(self.name(), self.guardrail_type())),
            Err(errors) => {
                let message = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
                Ok(GuardrailResult::trip(self.name(), self.guardrail_type(), format!("argument schema violation for {}: {message}", self.tool_name)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keyword_blocklist_trips_on_match() {
        let g = KeywordBlocklistGuardrail::new(GuardrailType::Input, vec!["secret".into()]);
        let ctx = GuardrailContext { input_text: Some("tell me the SECRET plan".into()), ..Default::default() };
        let result = g.check(&ctx).await.unwrap();
        assert!(result.tripwire);
    }

    #[tokio::test]
    async fn keyword_blocklist_passes_clean_text() {
        let g = KeywordBlocklistGuardrail::new(GuardrailType::Input, vec!["secret".into()]);
        let ctx = GuardrailContext { input_text: Some("what's the weather".into()), ..Default::default() };
        let result = g.check(&ctx).await.unwrap();
        assert!(!result.tripwire);
    }

    #[tokio::test]
    async fn max_length_trips_over_ceiling() {
        let g = MaxLengthGuardrail::new(GuardrailType::Output, 5);
        let ctx = GuardrailContext { output_text: Some("way too long".into()), ..Default::default() };
        let result = g.check(&ctx).await.unwrap();
        assert!(result.tripwire);
    }

    #[tokio::test]
    async fn max_length_passes_under_ceiling() {
        let g = MaxLengthGuardrail::new(GuardrailType::Output, 50);
        let ctx = GuardrailContext { output_text: Some("short".into()), ..Default::default() };
        let result = g.check(&ctx).await.unwrap();
        assert!(!result.tripwire);
    }

    #[tokio::test]
    async fn max_length_trips_over_ceiling_for_tool_call() {
        let g = MaxLengthGuardrail::new(GuardrailType::ToolCall, 10);
        let ctx = GuardrailContext {
            tool_arguments: Some(serde_json::json!({"expression": "1+1+1+1+1+1+1+1+1"})),
            ..Default::default()
        };
        let result = g.check(&ctx).await.unwrap();
        assert!(result.tripwire);
    }

    #[tokio::test]
    async fn max_length_passes_under_ceiling_for_tool_call() {
        let g = MaxLengthGuardrail::new(GuardrailType::ToolCall, 200);
        let ctx = GuardrailContext {
            tool_arguments: Some(serde_json::json!({"expression": "1+1"})),
            ..Default::default()
        };
        let result = g.check(&ctx).await.unwrap();
        assert!(!result.tripwire);
    }

    #[tokio::test]
    async fn tool_argument_schema_trips_on_missing_required_field() {
        let schema = serde_json::json!({
            "type": "object",
            "required": ["expression"],
            "properties": { "expression": { "type": "string" } }
        });
        let g = ToolArgumentSchemaGuardrail::new("calculator", &schema).unwrap();
        let ctx = GuardrailContext {
            tool_name: Some("calculator".into()),
            tool_arguments: Some(serde_json::json!({})),
            ..Default::default()
        };
        let result = g.check(&ctx).await.unwrap();
        assert!(result.tripwire);
    }

    #[tokio::test]
    async fn tool_argument_schema_passes_matching_tool_call() {
        let schema = serde_json::json!({
            "type": "object",
            "required": ["expression"],
            "properties": { "expression": { "type": "string" } }
        });
        let g = ToolArgumentSchemaGuardrail::new("calculator", &schema).unwrap();
        let ctx = GuardrailContext {
            tool_name: Some("calculator".into()),
            tool_arguments: Some(serde_json::json!({"expression": "1+1"})),
            ..Default::default()
        };
        let result = g.check(&ctx).await.unwrap();
        assert!(!result.tripwire);
    }

    #[tokio::test]
    async fn tool_argument_schema_ignores_other_tools() {
        let schema = serde_json::json!({ "type": "object", "required": ["expression"] });
        let g = ToolArgumentSchemaGuardrail::new("calculator", &schema).unwrap();
        let ctx = GuardrailContext { tool_name: Some("ask_human".into()), tool_arguments: Some(serde_json::json!({})), ..Default::default() };
        let result = g.check(&ctx).await.unwrap();
        assert!(!result.tripwire);
    }
}
