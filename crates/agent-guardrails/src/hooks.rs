// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Lifecycle hook dispatch: named events fan out to registered async
//! callbacks in parallel; callback errors are logged and swallowed.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    RunStart,
    RunEnd,
    StepStart,
    StepEnd,
    LlmStart,
    LlmEnd,
    ToolStart,
    ToolEnd,
    GuardrailTrip,
}

/// Read-only context dict handed to a hook callback.
pub type HookContext = HashMap<String, Value>;

#[async_trait]
pub trait HookCallback: Send + Sync {
    async fn call(&self, ctx: &HookContext) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> HookCallback for F
where
    F: Fn(&HookContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    async fn call(&self, ctx: &HookContext) -> anyhow::Result<()> {
        (self)(ctx).await
    }
}

/// Registry of lifecycle hooks, owned per-orchestrator-instance (not global).
#[derive(Default)]
pub struct HookRegistry {
    callbacks: HashMap<HookEvent, Vec<Arc<dyn HookCallback>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            callbacks: HashMap::new(),
        }
    }

    pub fn on(&mut self, event: HookEvent, cb: Arc<dyn HookCallback>) {
        self.callbacks.entry(event).or_default().push(cb);
    }

    /// Dispatch `event` to all registered callbacks in parallel. Exceptions
    /// are logged and swallowed — a hook can never fail the run.
    pub async fn dispatch(&self, event: HookEvent, ctx: HookContext) {
        let Some(cbs) = self.callbacks.get(&event) else {
            return;
        };
        let futures = cbs.iter().map(|cb| {
            let ctx = &ctx;
            async move {
                let result = AssertUnwindSafe(cb.call(ctx)).catch_unwind().await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(?event, error = %err, "hook callback failed"),
                    Err(_) => warn!(?event, "hook callback panicked"),
                }
            }
        });
        futures::future::join_all(futures).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn dispatch_with_no_callbacks_is_a_noop() {
        let reg = HookRegistry::new();
        reg.dispatch(HookEvent::RunStart, HookContext::new()).await;
    }

    #[tokio::test]
    async fn dispatch_calls_registered_callback() {
        let mut reg = HookRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        reg.on(
            HookEvent::RunStart,
            Arc::new(move |_ctx: &HookContext| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        reg.dispatch(HookEvent::RunStart, HookContext::new()).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_callback_does_not_stop_others() {
        let mut reg = HookRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        reg.on(
            HookEvent::ToolEnd,
            Arc::new(|_ctx: &HookContext| async move { anyhow::bail!("boom") }),
        );
        let c = counter.clone();
        reg.on(
            HookEvent::ToolEnd,
            Arc::new(move |_ctx: &HookContext| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        reg.dispatch(HookEvent::ToolEnd, HookContext::new()).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn events_are_independent() {
        let mut reg = HookRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        reg.on(
            HookEvent::StepStart,
            Arc::new(move |_ctx: &HookContext| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        reg.dispatch(HookEvent::StepEnd, HookContext::new()).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
