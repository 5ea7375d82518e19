// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bridge between the orchestrator's synchronous approval/input calls and an
//! asynchronous HTTP/SSE client.
//!
//! The agent blocks on `request_approval`/`request_input`; the outgoing queue
//! carries the request to the SSE sender; a separate POST handler calls
//! `resolve` with the user's response, which wakes the blocked call. Mirrors
//! the pending-request-table pattern the control service used for in-process
//! approvals, generalized to an HTTP rendezvous keyed by request id.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{
    HumanInputRequest, HumanInputResponse, InputOption, OutgoingEvent, ToolApprovalAction,
    ToolApprovalRequest, ToolApprovalResponse,
};

/// Default timeout (seconds) for a HITL round trip before treating it as denied.
pub const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 300;

type PendingMap = Mutex<HashMap<Uuid, oneshot::Sender<serde_json::Value>>>;

/// Bidirectional bridge between the orchestrator's HITL handlers and the chat
/// server's HTTP/SSE layer.
///
/// Outgoing (agent → frontend): events are pushed onto an unbounded mpsc
/// channel; the SSE sender is the single consumer via [`HitlBridge::next_event`].
/// Incoming (frontend → agent): [`HitlBridge::resolve`] completes the matching
/// pending entry.
pub struct HitlBridge {
    outgoing_tx: mpsc::UnboundedSender<Option<OutgoingEvent>>,
    outgoing_rx: Mutex<Option<mpsc::UnboundedReceiver<Option<OutgoingEvent>>>>,
    pending: PendingMap,
    response_timeout: Duration,
}

impl HitlBridge {
    pub fn new(response_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            outgoing_tx: tx,
            outgoing_rx: Mutex::new(Some(rx)),
            pending: Mutex::new(HashMap::new()),
            response_timeout,
        }
    }

    /// Drain the next outgoing event. Returns `None` once `signal_done` has
    /// fired and the queue is empty. Only one caller may hold the receiver at
    /// a time — the SSE sender is strictly single-consumer.
    pub async fn next_event(&self) -> Option<OutgoingEvent> {
        let mut guard = self.outgoing_rx.lock().unwrap();
        let rx = guard.as_mut()?;
        match rx.recv().await {
            Some(Some(ev)) => Some(ev),
            Some(None) | None => {
                *guard = None;
                None
            }
        }
    }

    /// Signal that the agent worker has finished; after this, once the queue
    /// drains, `next_event` returns `None` and the SSE sender closes.
    pub fn signal_done(&self) {
        let _ = self.outgoing_tx.send(None);
    }

    /// Resolve a pending request with the client's response payload.
    /// Returns `true` if a matching, still-open request was found.
    pub fn resolve(&self, request_id: Uuid, data: serde_json::Value) -> bool {
        let tx = self.pending.lock().unwrap().remove(&request_id);
        match tx {
            Some(tx) => {
                let ok = tx.send(data).is_ok();
                if ok {
                    info!(%request_id, "resolved HITL request");
                } else {
                    warn!(%request_id, "HITL request receiver already dropped");
                }
                ok
            }
            None => {
                warn!(%request_id, "no pending HITL request for id");
                false
            }
        }
    }

    async fn request_and_wait(
        &self,
        request_id: Uuid,
        event: OutgoingEvent,
    ) -> Option<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id, tx);
        if self.outgoing_tx.send(Some(event)).is_err() {
            self.pending.lock().unwrap().remove(&request_id);
            return None;
        }
        debug!(%request_id, timeout_secs = self.response_timeout.as_secs(), "HITL request sent, awaiting response");

        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(_)) | Err(_) => {
                self.pending.lock().unwrap().remove(&request_id);
                warn!(%request_id, "HITL request timed out or was dropped");
                None
            }
        }
    }

    /// Request approval to run a tool call. Timeout or any malformed response
    /// is treated as `deny` — the agent is never left blocked.
    pub async fn request_approval(
        &self,
        tool_name: &str,
        call_id: &str,
        arguments: serde_json::Value,
        context: Option<String>,
    ) -> ToolApprovalResponse {
        let request_id = Uuid::new_v4();
        let event = OutgoingEvent::ToolApprovalRequest {
            request_id,
            tool_name: tool_name.to_string(),
            call_id: call_id.to_string(),
            arguments,
            context,
        };
        match self.request_and_wait(request_id, event).await {
            None => ToolApprovalResponse {
                request_id,
                action: ToolApprovalAction::Deny,
                modified_arguments: None,
                reason: Some("approval timed out — denied by default".into()),
            },
            Some(data) => {
                let action = data
                    .get("action")
                    .and_then(|v| v.as_str())
                    .and_then(|s| match s {
                        "approve" => Some(ToolApprovalAction::Approve),
                        "modify" => Some(ToolApprovalAction::Modify),
                        _ => Some(ToolApprovalAction::Deny),
                    })
                    .unwrap_or(ToolApprovalAction::Deny);
                ToolApprovalResponse {
                    request_id,
                    action,
                    modified_arguments: data.get("modified_arguments").cloned(),
                    reason: data
                        .get("reason")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                }
            }
        }
    }

    /// Request free-form/multiple-choice input from a human.
    pub async fn request_human_input(
        &self,
        question: &str,
        context: Option<String>,
        options: Vec<InputOption>,
        allow_freeform: bool,
    ) -> HumanInputResponse {
        let request_id = Uuid::new_v4();
        let event = OutgoingEvent::HumanInputRequest {
            request_id,
            question: question.to_string(),
            context,
            options,
            allow_freeform,
        };
        match self.request_and_wait(request_id, event).await {
            None => HumanInputResponse {
                request_id,
                selected_key: None,
                selected_label: None,
                freeform_text: None,
                timed_out: true,
            },
            Some(data) => HumanInputResponse {
                request_id,
                selected_key: data
                    .get("selected_key")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                selected_label: data
                    .get("selected_label")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                freeform_text: data
                    .get("freeform_text")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                timed_out: false,
            },
        }
    }

    /// Number of requests currently awaiting a response. Exposed for
    /// cancellation: when a client disconnects, the caller discards these by
    /// dropping the bridge (pending oneshot senders then fail silently).
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl Default for HitlBridge {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_RESPONSE_TIMEOUT_SECS))
    }
}

/// Discards unresolved `ToolApprovalRequest`s belonging to a request, used by
/// the approval-denied path once a response converts into an error result.
/// Kept as a free function because `ToolApprovalRequest` is otherwise only
/// constructed by callers outside this crate (the orchestrator).
pub fn synthesize_timeout_request(tool_name: &str, call_id: &str) -> ToolApprovalRequest {
    ToolApprovalRequest {
        request_id: Uuid::new_v4(),
        tool_name: tool_name.to_string(),
        call_id: call_id.to_string(),
        arguments: serde_json::Value::Null,
        context: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bridge() -> HitlBridge {
        HitlBridge::new(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn approval_resolves_with_response() {
        let b = bridge();
        let fut = b.request_approval("calculator", "call-1", json!({"x": 1}), None);
        tokio::pin!(fut);

        let ev = tokio::select! {
            ev = b.next_event() => ev.unwrap(),
            _ = &mut fut => panic!("resolved before event observed"),
        };
        let request_id = match ev {
            OutgoingEvent::ToolApprovalRequest { request_id, .. } => request_id,
            _ => panic!("wrong event kind"),
        };
        assert!(b.resolve(request_id, json!({"action": "approve"})));
        let resp = fut.await;
        assert_eq!(resp.action, ToolApprovalAction::Approve);
    }

    #[tokio::test]
    async fn approval_times_out_as_deny() {
        let b = bridge();
        let resp = b
            .request_approval("calculator", "call-2", json!({}), None)
            .await;
        assert_eq!(resp.action, ToolApprovalAction::Deny);
        assert!(resp.reason.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn resolve_unknown_request_id_returns_false() {
        let b = bridge();
        assert!(!b.resolve(Uuid::new_v4(), json!({})));
    }

    #[tokio::test]
    async fn resolve_twice_second_call_returns_false() {
        let b = bridge();
        let fut = b.request_approval("t", "c", json!({}), None);
        tokio::pin!(fut);
        let ev = tokio::select! {
            ev = b.next_event() => ev.unwrap(),
            _ = &mut fut => panic!(),
        };
        let request_id = match ev {
            OutgoingEvent::ToolApprovalRequest { request_id, .. } => request_id,
            _ => panic!(),
        };
        assert!(b.resolve(request_id, json!({"action": "deny"})));
        assert!(!b.resolve(request_id, json!({"action": "approve"})));
        let _ = fut.await;
    }

    #[tokio::test]
    async fn human_input_resolves_selected_key() {
        let b = bridge();
        let fut = b.request_human_input(
            "Proceed?",
            None,
            vec![InputOption {
                key: "yes".into(),
                label: "Yes".into(),
                description: None,
            }],
            false,
        );
        tokio::pin!(fut);
        let ev = tokio::select! {
            ev = b.next_event() => ev.unwrap(),
            _ = &mut fut => panic!(),
        };
        let request_id = match ev {
            OutgoingEvent::HumanInputRequest { request_id, .. } => request_id,
            _ => panic!(),
        };
        assert!(b.resolve(request_id, json!({"selected_key": "yes"})));
        let resp = fut.await;
        assert_eq!(resp.selected_key.as_deref(), Some("yes"));
        assert!(!resp.timed_out);
    }

    #[tokio::test]
    async fn human_input_times_out() {
        let b = bridge();
        let resp = b.request_human_input("Q?", None, vec![], true).await;
        assert!(resp.timed_out);
    }

    #[tokio::test]
    async fn signal_done_ends_event_stream() {
        let b = bridge();
        b.signal_done();
        assert!(b.next_event().await.is_none());
    }

    #[tokio::test]
    async fn events_are_delivered_in_submission_order() {
        let b = bridge();
        let f1 = b.request_approval("a", "1", json!({}), None);
        let f2 = b.request_approval("b", "2", json!({}), None);
        tokio::pin!(f1);
        tokio::pin!(f2);

        // Drive both futures just enough to enqueue their events, then read
        // both off the queue and check ordering.
        let ev1 = tokio::select! { ev = b.next_event() => ev.unwrap(), _ = &mut f1 => panic!() };
        let ev2 = tokio::select! { ev = b.next_event() => ev.unwrap(), _ = &mut f2 => panic!() };
        let id1 = match ev1 {
            OutgoingEvent::ToolApprovalRequest { call_id, .. } => call_id,
            _ => panic!(),
        };
        let id2 = match ev2 {
            OutgoingEvent::ToolApprovalRequest { call_id, .. } => call_id,
            _ => panic!(),
        };
        assert_eq!(id1, "1");
        assert_eq!(id2, "2");
        drop(f1);
        drop(f2);
    }

    #[test]
    fn pending_count_reflects_outstanding_requests() {
        let b = bridge();
        assert_eq!(b.pending_count(), 0);
    }
}
