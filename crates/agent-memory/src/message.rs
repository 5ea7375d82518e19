// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The discriminated-union message log shared by the orchestrator and both
//! memory tiers. Serialization is a tagged `type` field over a closed
//! five-variant registry; an unknown tag is a fatal decode error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Base64-encoded binary payload for a media content block, nested under a
/// `source` field on the wire (matching the original `{"source": {"media_type":
/// ..., "data": ...}}` shape rather than flattening the fields onto the block).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSource {
    pub media_type: String,
    pub data: String,
}

/// A single piece of multimodal content (user input or assistant output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaContent {
    Text { text: String },
    Image { source: MediaSource },
    Audio { source: MediaSource },
    Video { source: MediaSource },
}

/// A tool-call intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallIntent {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// A single content block in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    Text { text: String },
    Image { source: MediaSource },
    Error { message: String },
    File { name: String, source: MediaSource },
}

/// One entry in a conversation log. Every variant carries a unique id; the
/// `type` tag is preserved on the wire by serde's externally tagged enum
/// representation, giving a closed, fail-closed registry on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    System {
        id: Uuid,
        text: String,
    },
    User {
        id: Uuid,
        content: Vec<MediaContent>,
    },
    Assistant {
        id: Uuid,
        #[serde(default)]
        reasoning: Option<String>,
        #[serde(default)]
        content: Vec<MediaContent>,
        #[serde(default)]
        tool_calls: Vec<ToolCallIntent>,
        finish_reason: FinishReason,
        #[serde(default)]
        usage: Usage,
    },
    ToolCall {
        id: Uuid,
        call_id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        id: Uuid,
        call_id: String,
        content: Vec<ToolResultContent>,
        is_error: bool,
    },
}

impl Message {
    pub fn id(&self) -> Uuid {
        match self {
            Message::System { id, .. }
            | Message::User { id, .. }
            | Message::Assistant { id, .. }
            | Message::ToolCall { id, .. }
            | Message::ToolResult { id, .. } => *id,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::ToolCall { .. } => "tool_call",
            Message::ToolResult { .. } => "tool_result",
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User {
            id: Uuid::new_v4(),
            content: vec![MediaContent::Text { text: text.into() }],
        }
    }

    pub fn system_text(text: impl Into<String>) -> Self {
        Message::System {
            id: Uuid::new_v4(),
            text: text.into(),
        }
    }
}

/// Fatal error raised when a stored payload's `type` tag is not one of the
/// five closed variants, or the payload is otherwise malformed. Bubbles up to
/// the HTTP layer as a store-invariant violation (§7).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown message type tag: {0}")]
    UnknownType(String),
    #[error("malformed message payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode a stored JSON payload into a [`Message`], fail-closed on any tag
/// outside the closed registry.
pub fn decode_message(payload: &Value) -> Result<Message, DecodeError> {
    let tag = payload
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| DecodeError::UnknownType("<missing>".into()))?;
    const KNOWN: [&str; 5] = ["system", "user", "assistant", "tool_call", "tool_result"];
    if !KNOWN.contains(&tag) {
        return Err(DecodeError::UnknownType(tag.to_string()));
    }
    Ok(serde_json::from_value(payload.clone())?)
}

pub fn encode_message(message: &Message) -> Value {
    serde_json::to_value(message).expect("Message serialization is infallible")
}
