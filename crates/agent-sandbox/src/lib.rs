// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The code interpreter service: a pool of sandboxed VMs that execute
//! untrusted Python/Bash on behalf of agent sessions, fronted by an HTTP
//! facade with bearer auth and consistent-hash pod routing.

pub mod auth;
pub mod http;
pub mod pool;
pub mod protocol;
pub mod python_repl;
pub mod routing;
pub mod session;
pub mod vm;

use std::net::SocketAddr;
use std::sync::Arc;

use agent_config::PlatformConfig;

use crate::auth::AuthState;
use crate::pool::VmPool;
use crate::session::SandboxSessionManager;
use crate::vm::{VmManager, VmManagerConfig};

/// Bring up the sandbox service's warm pool, session manager, and HTTP
/// facade, and serve until the process is asked to stop.
pub async fn serve(platform: PlatformConfig, self_url: String, bind_addr: SocketAddr) -> anyhow::Result<()> {
    let manager = VmManager::new(VmManagerConfig {
        vsock_port: platform.vsock_port,
        ..VmManagerConfig::default()
    });
    let pool = VmPool::new(manager, platform.pool_size, platform.max_sessions);
    pool.warm_up().await;

    let sessions = SandboxSessionManager::with_idle_timeout(
        pool,
        std::time::Duration::from_secs(platform.session_idle_timeout_secs),
    );
    sessions.spawn_eviction_loop();

    let auth = AuthState::with_defaults(platform.bearer_token.as_deref());
    let state = http::AppState {
        sessions,
        auth,
        platform: Arc::new(platform),
        self_url,
        http_client: reqwest::Client::new(),
    };

    let app = http::router(state);
    tracing::info!(%bind_addr, "sandbox service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
