// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! A single sandbox VM: its lifecycle state, work directory, and the child
//! process standing in for the hypervisor (§4.4, §9 — no real hypervisor is
//! present in this environment, so the "hypervisor" here is the
//! `agent-sandbox-guest` binary and the vsock device is a UNIX socket).

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use uuid::Uuid;

use crate::protocol::{self, GuestRequest, GuestResponse, ProtocolError};

#[derive(Debug, Error)]
pub enum VmError {
    #[error("failed to spawn guest process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("guest socket never appeared within {0:?}")]
    SocketTimeout(Duration),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("vm {0} is not alive")]
    Dead(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Creating,
    Ready,
    Busy,
    Stopping,
    Dead,
}

/// Monotonic vsock CID allocator. Real vsock CIDs start at 3 (0-2 are
/// reserved); kept here even though the UNIX-socket stand-in doesn't need a
/// real CID, so the allocation contract in §3 is still observable.
static NEXT_CID: AtomicU32 = AtomicU32::new(3);

fn allocate_cid() -> u32 {
    NEXT_CID.fetch_add(1, Ordering::SeqCst)
}

/// Configuration for spawning guest processes.
#[derive(Debug, Clone)]
pub struct VmManagerConfig {
    /// Directory under which each VM gets its own subdirectory.
    pub base_dir: PathBuf,
    /// Path to the `agent-sandbox-guest` binary.
    pub guest_binary: PathBuf,
    /// vsock port the guest agent listens on (guest-side; stand-in only).
    pub vsock_port: u32,
    /// How long to wait for the guest's socket file to appear.
    pub boot_timeout: Duration,
}

impl Default for VmManagerConfig {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir().join("agent-sandbox"),
            guest_binary: default_guest_binary_path(),
            vsock_port: 5005,
            boot_timeout: Duration::from_secs(30),
        }
    }
}

fn default_guest_binary_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("agent-sandbox-guest")))
        .unwrap_or_else(|| PathBuf::from("agent-sandbox-guest"))
}

pub struct Vm {
    pub id: Uuid,
    pub cid: u32,
    pub state: VmState,
    pub socket_path: PathBuf,
    pub work_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub vsock_port: u32,
    child: Child,
}

impl Vm {
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Open a fresh connection to the guest and run one request through the
    /// handshake. Sandbox protocol connections are not kept open between
    /// calls: each request dials in, which keeps the binding logic in
    /// `SessionManager` simple at the cost of a handshake per call.
    pub async fn call(&self, request: &GuestRequest, timeout_dur: Duration) -> Result<GuestResponse, VmError> {
        let socket = self.socket_path.to_str().ok_or_else(|| {
            VmError::Protocol(ProtocolError::Malformed(serde_json::Error::io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "non-utf8 socket path",
            ))))
        })?;
        let mut stream = protocol::handshake(socket, self.vsock_port).await?;
        Ok(protocol::call(&mut stream, request, timeout_dur).await?)
    }
}

pub struct VmManager {
    config: VmManagerConfig,
}

impl VmManager {
    pub fn new(config: VmManagerConfig) -> Self {
        Self { config }
    }

    /// Create and boot one VM: allocate a work directory and CID, launch the
    /// guest process, and wait for its socket to appear (§4.4 step 1).
    pub async fn create(&self) -> Result<Vm, VmError> {
        let id = Uuid::new_v4();
        let cid = allocate_cid();
        let work_dir = self.config.base_dir.join(id.to_string());
        std::fs::create_dir_all(&work_dir)?;
        let socket_path = work_dir.join("vm.sock");

        let child = Command::new(&self.config.guest_binary)
            .arg("--socket")
            .arg(&socket_path)
            .arg("--port")
            .arg(self.config.vsock_port.to_string())
            .arg("--workdir")
            .arg(&work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        wait_for_socket(&socket_path, self.config.boot_timeout).await?;

        Ok(Vm {
            id,
            cid,
            state: VmState::Ready,
            socket_path,
            work_dir,
            created_at: Utc::now(),
            vsock_port: self.config.vsock_port,
            child,
        })
    }

    /// Best-effort soft shutdown, then SIGTERM, then SIGKILL after 5s
    /// (§4.4 step 6), then remove the work directory.
    pub async fn destroy(&self, mut vm: Vm) {
        vm.state = VmState::Stopping;
        let _ = vm.call(&GuestRequest::Shutdown, Duration::from_secs(5)).await;
        let _ = vm.child.start_kill();
        let _ = timeout(Duration::from_secs(5), vm.child.wait()).await;
        let _ = vm.child.kill().await;
        let _ = std::fs::remove_dir_all(&vm.work_dir);
    }
}

async fn wait_for_socket(path: &std::path::Path, bound: Duration) -> Result<(), VmError> {
    let started = tokio::time::Instant::now();
    loop {
        if path.exists() {
            return Ok(());
        }
        if started.elapsed() > bound {
            return Err(VmError::SocketTimeout(bound));
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
