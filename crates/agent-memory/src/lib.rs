// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tiered session memory: a hot in-process cache backed by a durable
//! SQLite-backed cold store, tied together by [`SessionManager`].

pub mod cold;
pub mod hot;
pub mod message;
pub mod session_manager;

pub use cold::{ColdTier, ColdTierError, SessionRow};
pub use hot::{HotTier, HotTierConfig};
pub use message::{
    decode_message, encode_message, DecodeError, FinishReason, MediaContent, MediaSource, Message,
    ToolCallIntent, ToolResultContent, Usage,
};
pub use session_manager::{MemoryError, MemoryResult, Session, SessionManager, DEFAULT_CHECKPOINT_THRESHOLD};
