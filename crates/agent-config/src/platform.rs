// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Environment configuration for the runtime's own services (memory tiers,
//! sandbox service, bearer auth) as opposed to [`crate::ModelConfig`], which
//! configures the model providers an agent talks to.

use serde::{Deserialize, Serialize};

fn default_hot_tier_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_cold_tier_url() -> String {
    "sqlite://agentd.db".to_string()
}

fn default_sandbox_url() -> String {
    "http://127.0.0.1:8088".to_string()
}

fn default_replica_count() -> usize {
    1
}

fn default_pool_size() -> usize {
    4
}

fn default_max_sessions() -> usize {
    50
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_timeout_secs() -> u64 {
    300
}

fn default_max_code_size_bytes() -> usize {
    1024 * 1024
}

fn default_vsock_port() -> u32 {
    5005
}

fn default_hot_tier_ttl_secs() -> u64 {
    3600
}

fn default_session_idle_timeout_secs() -> u64 {
    1800
}

/// Environment configuration for the memory tiers, the sandbox service, and
/// the shared bearer token. Every field has a default so a bare `agentd`
/// invocation with no config file still runs standalone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Hot-tier backing store URL (a Redis-compatible cache in the source
    /// system; here an in-process store is also accepted behind the same
    /// contract — see `agent-memory::HotTier`).
    #[serde(default = "default_hot_tier_url")]
    pub hot_tier_url: String,

    /// TTL refreshed on every hot-tier write.
    #[serde(default = "default_hot_tier_ttl_secs")]
    pub hot_tier_ttl_secs: u64,

    /// Cold-tier (durable) store URL.
    #[serde(default = "default_cold_tier_url")]
    pub cold_tier_url: String,

    /// Base URL of the sandbox (code interpreter) service.
    #[serde(default = "default_sandbox_url")]
    pub sandbox_url: String,

    /// Additional sandbox pod URLs for consistent-hash routing, beyond
    /// `sandbox_url`. Empty means single-pod (no horizontal routing).
    #[serde(default)]
    pub sandbox_pod_urls: Vec<String>,

    /// Number of chat-server replicas behind the load balancer; informational
    /// only, used in log context and health responses.
    #[serde(default = "default_replica_count")]
    pub replica_count: usize,

    /// Shared bearer token required on sandbox service routes (except
    /// `/health`). `None` disables auth — only appropriate for local dev.
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Warm-pool size per sandbox pod.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Maximum concurrent sessions per sandbox pod.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Default per-request timeout (tool execution, sandbox execute).
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Service-wide ceiling a caller's requested timeout is clamped to.
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,

    /// Maximum size of a single code-execution payload.
    #[serde(default = "default_max_code_size_bytes")]
    pub max_code_size_bytes: usize,

    /// Idle time after which a session's bound VM is reclaimed.
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,

    /// Guest-side vsock port the guest agent listens on.
    #[serde(default = "default_vsock_port")]
    pub vsock_port: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            hot_tier_url: default_hot_tier_url(),
            hot_tier_ttl_secs: default_hot_tier_ttl_secs(),
            cold_tier_url: default_cold_tier_url(),
            sandbox_url: default_sandbox_url(),
            sandbox_pod_urls: Vec::new(),
            replica_count: default_replica_count(),
            bearer_token: None,
            pool_size: default_pool_size(),
            max_sessions: default_max_sessions(),
            default_timeout_secs: default_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            max_code_size_bytes: default_max_code_size_bytes(),
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
            vsock_port: default_vsock_port(),
        }
    }
}

impl PlatformConfig {
    /// All pod URLs this routing client may hash a session onto, in a stable
    /// order: the primary `sandbox_url` first, then `sandbox_pod_urls`.
    pub fn all_pod_urls(&self) -> Vec<String> {
        let mut urls = vec![self.sandbox_url.clone()];
        urls.extend(self.sandbox_pod_urls.iter().cloned());
        urls
    }

    /// Clamp a caller-requested timeout (seconds) to `max_timeout_secs`.
    pub fn clamp_timeout_secs(&self, requested: u64) -> u64 {
        requested.min(self.max_timeout_secs)
    }
}
