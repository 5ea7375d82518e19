// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Public facade over the tiered hot/cold memory store: reads prefer the hot
//! tier, writes land in both, and `checkpoint` reconciles the hot tier's
//! current view into durable storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use regex::Regex;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::cold::{ColdTier, ColdTierError, SessionRow};
use crate::hot::{HotTier, HotTierConfig};
use crate::message::Message;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error(transparent)]
    Cold(#[from] ColdTierError),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("invalid session id {0:?}: must match ^[A-Za-z0-9_-]{{1,128}}$")]
    InvalidSessionId(String),
}

pub type MemoryResult<T> = Result<T, MemoryError>;

/// Default number of appended messages before an automatic checkpoint is
/// triggered. `0` disables auto-checkpoint entirely.
pub const DEFAULT_CHECKPOINT_THRESHOLD: usize = 50;

/// A session as seen by a caller: the durable cold-tier row plus the
/// transient `is_hot` flag (present in the hot-tier cache right now). Unlike
/// every other `SessionRow` field, `is_hot` is never persisted — it reflects
/// this process's cache occupancy at the moment of the call.
#[derive(Debug, Clone)]
pub struct Session {
    pub row: SessionRow,
    pub is_hot: bool,
}

fn validate_session_id(session_id: &str) -> MemoryResult<()> {
    let re = Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("static pattern is valid");
    if re.is_match(session_id) {
        Ok(())
    } else {
        Err(MemoryError::InvalidSessionId(session_id.to_string()))
    }
}

/// Ties the hot and cold tiers together behind a single per-session async
/// lock so that a checkpoint never races a concurrent append for the same
/// session. Also tracks a per-session dirty counter so a run of many
/// `add_messages` calls auto-checkpoints without the caller having to
/// remember to.
pub struct SessionManager {
    hot: HotTier,
    cold: Arc<ColdTier>,
    checkpoint_lock: AsyncMutex<()>,
    checkpoint_threshold: usize,
    dirty_counts: StdMutex<HashMap<String, usize>>,
}

impl SessionManager {
    pub fn new(hot_config: HotTierConfig, cold: Arc<ColdTier>) -> Self {
        Self::with_checkpoint_threshold(hot_config, cold, DEFAULT_CHECKPOINT_THRESHOLD)
    }

    pub fn with_checkpoint_threshold(
        hot_config: HotTierConfig,
        cold: Arc<ColdTier>,
        checkpoint_threshold: usize,
    ) -> Self {
        Self {
            hot: HotTier::new(hot_config),
            cold,
            checkpoint_lock: AsyncMutex::new(()),
            checkpoint_threshold,
            dirty_counts: StdMutex::new(HashMap::new()),
        }
    }

    pub async fn create_session(
        &self,
        session_id: &str,
        agent_name: Option<&str>,
        user_id: Option<&str>,
        metadata: Value,
    ) -> MemoryResult<()> {
        validate_session_id(session_id)?;
        self.cold.create_session(session_id, agent_name, user_id, metadata.clone()).await?;
        self.hot.replace(session_id, Vec::new());
        self.hot.mirror_metadata(session_id, metadata);
        info!(session_id, "session created");
        Ok(())
    }

    pub async fn list_sessions(&self, limit: i64, offset: i64) -> MemoryResult<Vec<SessionRow>> {
        Ok(self.cold.list_sessions(limit, offset).await?)
    }

    /// Look up a session's durable row, annotated with whether it currently
    /// has a live hot-tier entry.
    pub async fn get_session(&self, session_id: &str) -> MemoryResult<Option<Session>> {
        let Some(row) = self.cold.get_session(session_id).await? else {
            return Ok(None);
        };
        let is_hot = self.hot.contains(session_id);
        Ok(Some(Session { row, is_hot }))
    }

    pub async fn set_status(&self, session_id: &str, status: &str) -> MemoryResult<()> {
        Ok(self.cold.set_status(session_id, status).await?)
    }

    /// Load a session's full message log from the cold tier into the hot
    /// tier, returning the messages. Used when a session is reattached after
    /// a hot-tier eviction or process restart.
    pub async fn resume_session(&self, session_id: &str) -> MemoryResult<Vec<Message>> {
        let row = self
            .cold
            .get_session(session_id)
            .await?
            .ok_or_else(|| MemoryError::SessionNotFound(session_id.to_string()))?;
        let _ = row;
        let messages = self.cold.get_messages(session_id).await?;
        self.hot.replace(session_id, messages.clone());
        Ok(messages)
    }

    pub async fn add_message(&self, session_id: &str, message: Message) -> MemoryResult<()> {
        self.add_messages(session_id, vec![message]).await
    }

    /// Append to both tiers. The hot tier is updated first so readers see
    /// the new messages immediately; the cold tier append is the durability
    /// boundary callers should treat as the point of no return.
    pub async fn add_messages(&self, session_id: &str, messages: Vec<Message>) -> MemoryResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        self.hot.append_many(session_id, messages.clone());
        self.cold.append_messages(session_id, messages.clone()).await?;

        if self.checkpoint_threshold > 0 {
            let should_checkpoint = {
                let mut counts = self.dirty_counts.lock().unwrap();
                let count = counts.entry(session_id.to_string()).or_insert(0);
                *count += messages.len();
                if *count >= self.checkpoint_threshold {
                    *count = 0;
                    true
                } else {
                    false
                }
            };
            if should_checkpoint {
                if let Err(err) = self.checkpoint(session_id).await {
                    warn!(session_id, error = %err, "auto-checkpoint failed");
                }
            }
        }
        Ok(())
    }

    /// Prefer the hot tier; fall back to a cold-tier resume on a miss (TTL
    /// expiry or process restart) so callers never see a spurious empty log.
    pub async fn get_messages(&self, session_id: &str) -> MemoryResult<Vec<Message>> {
        if let Some(messages) = self.hot.get(session_id) {
            return Ok(messages);
        }
        self.resume_session(session_id).await
    }

    /// Reconcile the hot tier's current view of `session_id` into the cold
    /// tier with an overwrite, not an append — this is what lets a checkpoint
    /// repair any divergence (e.g. a hot-tier trim that dropped messages the
    /// cold tier still has) rather than compounding it.
    pub async fn checkpoint(&self, session_id: &str) -> MemoryResult<()> {
        let _guard = self.checkpoint_lock.lock().await;
        let Some(messages) = self.hot.get(session_id) else {
            warn!(session_id, "checkpoint requested for session absent from hot tier");
            return Ok(());
        };
        self.cold.replace_messages(session_id, messages).await?;
        Ok(())
    }

    pub async fn close_session(&self, session_id: &str) -> MemoryResult<()> {
        self.checkpoint(session_id).await?;
        self.hot.evict(session_id);
        Ok(())
    }

    pub async fn delete_session(&self, session_id: &str) -> MemoryResult<()> {
        self.hot.evict(session_id);
        self.cold.delete_session(session_id).await?;
        Ok(())
    }

    pub fn sweep_expired_hot_entries(&self) -> usize {
        self.hot.sweep_expired()
    }
}
