// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! A warm pool of pre-booted sandbox VMs. Keeping a handful of VMs booted and
//! idle is what makes `acquire()` fast for the common case; a cold boot only
//! happens when the pool is empty or under its target size.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, Notify};

use crate::vm::{Vm, VmError, VmManager};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no vm became available within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Vm(#[from] VmError),
}

struct PoolState {
    idle: VecDeque<Vm>,
    outstanding: usize,
}

/// Bounded pool of [`Vm`]s. `target_size` is how many idle VMs the
/// background replenisher tries to keep booted; `max_size` bounds the total
/// number of VMs (idle + outstanding) in flight at once.
pub struct VmPool {
    manager: Arc<VmManager>,
    state: Mutex<PoolState>,
    notify: Notify,
    target_size: usize,
    max_size: usize,
    acquire_timeout: Duration,
}

impl VmPool {
    pub fn new(manager: VmManager, target_size: usize, max_size: usize) -> Arc<Self> {
        Self::with_acquire_timeout(manager, target_size, max_size, Duration::from_secs(60))
    }

    pub fn with_acquire_timeout(
        manager: VmManager,
        target_size: usize,
        max_size: usize,
        acquire_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager: Arc::new(manager),
            state: Mutex::new(PoolState { idle: VecDeque::new(), outstanding: 0 }),
            notify: Notify::new(),
            target_size,
            max_size,
            acquire_timeout,
        })
    }

    /// Pre-boot `target_size` VMs. Called once at startup; failures are
    /// logged and skipped so one bad boot doesn't block the others.
    pub async fn warm_up(self: &Arc<Self>) {
        for _ in 0..self.target_size {
            match self.manager.create().await {
                Ok(vm) => {
                    let mut state = self.state.lock().await;
                    state.idle.push_back(vm);
                }
                Err(e) => tracing::warn!(error = %e, "failed to pre-boot sandbox vm"),
            }
        }
    }

    /// Acquire a ready VM, booting a fresh one if the pool is empty and under
    /// `max_size`. Waits up to `acquire_timeout` (default 60s) for either an
    /// idle VM to free up or capacity to boot a new one.
    pub async fn acquire(self: &Arc<Self>) -> Result<Vm, PoolError> {
        let deadline = tokio::time::Instant::now() + self.acquire_timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                while let Some(mut vm) = state.idle.pop_front() {
                    if vm.is_alive() {
                        state.outstanding += 1;
                        return Ok(vm);
                    }
                    // Dead VM found in the idle queue; drop it and keep
                    // looking rather than handing back a corpse.
                }
                if state.outstanding + state.idle.len() < self.max_size {
                    state.outstanding += 1;
                    drop(state);
                    match self.manager.create().await {
                        Ok(vm) => return Ok(vm),
                        Err(e) => {
                            let mut state = self.state.lock().await;
                            state.outstanding -= 1;
                            tracing::warn!(error = %e, "failed to boot replacement sandbox vm");
                        }
                    }
                }
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(PoolError::Timeout(self.acquire_timeout));
            }
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    /// Return a VM to the idle queue, or destroy it if it died while in use.
    /// Also schedules a replacement boot in the background so the pool
    /// trends back toward `target_size` without blocking the releasing call.
    pub async fn release(self: &Arc<Self>, mut vm: Vm) {
        let alive = vm.is_alive();
        {
            let mut state = self.state.lock().await;
            state.outstanding -= 1;
            if alive {
                state.idle.push_back(vm);
            }
        }
        self.notify.notify_one();
        if !alive {
            let pool = self.clone();
            tokio::spawn(async move {
                if let Ok(fresh) = pool.manager.create().await {
                    let mut state = pool.state.lock().await;
                    state.idle.push_back(fresh);
                }
                pool.notify.notify_one();
            });
        }
    }

    /// Destroy a VM outright instead of returning it to the pool, e.g. after
    /// a fatal guest error. Schedules a replacement like `release` does.
    pub async fn retire(self: &Arc<Self>, vm: Vm) {
        {
            let mut state = self.state.lock().await;
            state.outstanding -= 1;
        }
        self.manager.destroy(vm).await;
        self.notify.notify_one();
    }

    pub async fn idle_count(&self) -> usize {
        self.state.lock().await.idle.len()
    }
}
