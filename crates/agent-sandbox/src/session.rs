// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Binds chat sessions to sandbox VMs so a session's successive code-cells
//! land on the same interpreter and see each other's globals (§4.4 step 2-3).
//! A background loop evicts VMs idle past `idle_timeout` (default 30 minutes)
//! and returns them to the pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::pool::{PoolError, VmPool};
use crate::protocol::{GuestRequest, GuestResponse, ProtocolError};
use crate::vm::Vm;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1800);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

struct SessionVm {
    vm: Vm,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
    exec_count: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("no sandbox vm is bound to session {0}")]
    NotBound(String),
}

pub struct SandboxSessionManager {
    pool: Arc<VmPool>,
    bindings: Mutex<HashMap<String, SessionVm>>,
    idle_timeout: Duration,
    request_timeout: Duration,
}

impl SandboxSessionManager {
    pub fn new(pool: Arc<VmPool>) -> Arc<Self> {
        Self::with_idle_timeout(pool, DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(pool: Arc<VmPool>, idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            pool,
            bindings: Mutex::new(HashMap::new()),
            idle_timeout,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Run a request against the session's bound VM, acquiring a fresh one
    /// from the pool on first use.
    pub async fn execute(&self, session_id: &str, request: GuestRequest) -> Result<GuestResponse, SessionError> {
        self.ensure_bound(session_id).await?;
        let mut bindings = self.bindings.lock().await;
        let entry = bindings.get_mut(session_id).ok_or_else(|| SessionError::NotBound(session_id.to_string()))?;
        let result = entry.vm.call(&request, self.request_timeout).await;
        entry.last_used = Utc::now();
        entry.exec_count += 1;
        Ok(result?)
    }

    async fn ensure_bound(&self, session_id: &str) -> Result<(), SessionError> {
        let already_bound = self.bindings.lock().await.contains_key(session_id);
        if already_bound {
            return Ok(());
        }
        let vm = self.pool.acquire().await?;
        let mut bindings = self.bindings.lock().await;
        bindings.entry(session_id.to_string()).or_insert_with(|| SessionVm {
            vm,
            created_at: Utc::now(),
            last_used: Utc::now(),
            exec_count: 0,
        });
        Ok(())
    }

    /// Reset the session's interpreter state without releasing its VM.
    pub async fn reset(&self, session_id: &str) -> Result<GuestResponse, SessionError> {
        self.execute(session_id, GuestRequest::Reset).await
    }

    /// Release the session's VM back to the pool and drop the binding.
    pub async fn close(&self, session_id: &str) {
        let removed = self.bindings.lock().await.remove(session_id);
        if let Some(entry) = removed {
            self.pool.release(entry.vm).await;
        }
    }

    pub async fn exec_count(&self, session_id: &str) -> Option<u64> {
        self.bindings.lock().await.get(session_id).map(|e| e.exec_count)
    }

    pub async fn bound_session_count(&self) -> usize {
        self.bindings.lock().await.len()
    }

    /// Sweep bindings idle past the configured timeout, releasing their VMs.
    /// Intended to be driven by a periodic background task.
    pub async fn evict_idle(&self) {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.idle_timeout).unwrap_or(chrono::Duration::seconds(1800));
        let expired: Vec<String> = {
            let bindings = self.bindings.lock().await;
            bindings.iter().filter(|(_, v)| v.last_used < cutoff).map(|(k, _)| k.clone()).collect()
        };
        for session_id in expired {
            tracing::info!(session_id, "evicting idle sandbox session");
            self.close(&session_id).await;
        }
    }

    /// Spawn the periodic eviction loop. Runs until the returned handle is
    /// dropped or aborted.
    pub fn spawn_eviction_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                manager.evict_idle().await;
            }
        })
    }
}
