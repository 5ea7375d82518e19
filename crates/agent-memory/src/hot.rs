// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! In-process hot tier: a bounded, TTL-expiring message cache keyed by
//! session id. Trades durability for latency — every write here must also
//! reach the cold tier via checkpoint before it can be trusted.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::message::Message;

struct Entry {
    messages: Vec<Message>,
    /// Mirror of the session's cold-tier metadata blob, kept alongside the
    /// message list under the same `<prefix>:<session_id>:*` key space (see
    /// `HotTierConfig::key_prefix`) rather than a second cache entry.
    metadata: Value,
    last_touched: Instant,
}

/// Hot-tier configuration. `key_prefix` mirrors the `<prefix>:<session_id>:*`
/// key-naming convention even though this store is in-process rather than a
/// separate cache server.
#[derive(Debug, Clone)]
pub struct HotTierConfig {
    pub ttl: Duration,
    pub max_messages: usize,
    pub key_prefix: String,
}

impl Default for HotTierConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_messages: 200,
            key_prefix: "agent".into(),
        }
    }
}

/// In-memory per-session message cache with TTL expiry and a max-length trim.
pub struct HotTier {
    config: HotTierConfig,
    sessions: Mutex<HashMap<String, Entry>>,
}

impl HotTier {
    pub fn new(config: HotTierConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn key(&self, session_id: &str) -> String {
        format!("{}:{}:messages", self.config.key_prefix, session_id)
    }

    /// Append a message, trimming to `max_messages` from the front if needed.
    /// Touches the TTL clock.
    pub fn append(&self, session_id: &str, message: Message) {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.entry(self.key(session_id)).or_insert_with(|| Entry {
            messages: Vec::new(),
            metadata: Value::Null,
            last_touched: Instant::now(),
        });
        entry.messages.push(message);
        if entry.messages.len() > self.config.max_messages {
            let overflow = entry.messages.len() - self.config.max_messages;
            entry.messages.drain(0..overflow);
        }
        entry.last_touched = Instant::now();
    }

    pub fn append_many(&self, session_id: &str, messages: impl IntoIterator<Item = Message>) {
        for m in messages {
            self.append(session_id, m);
        }
    }

    /// Returns `None` if the session is absent or has expired its TTL.
    pub fn get(&self, session_id: &str) -> Option<Vec<Message>> {
        let mut sessions = self.sessions.lock().unwrap();
        let key = self.key(session_id);
        let expired = sessions
            .get(&key)
            .map(|e| e.last_touched.elapsed() > self.config.ttl)
            .unwrap_or(false);
        if expired {
            sessions.remove(&key);
            return None;
        }
        sessions.get(&key).map(|e| e.messages.clone())
    }

    /// Replace the cached message list wholesale (used after a resume from
    /// the cold tier, or after a checkpoint reconciliation). Preserves any
    /// metadata already mirrored for this session.
    pub fn replace(&self, session_id: &str, messages: Vec<Message>) {
        let mut sessions = self.sessions.lock().unwrap();
        let key = self.key(session_id);
        let metadata = sessions.get(&key).map(|e| e.metadata.clone()).unwrap_or(Value::Null);
        sessions.insert(
            key,
            Entry {
                messages,
                metadata,
                last_touched: Instant::now(),
            },
        );
    }

    /// Mirror a session's cold-tier metadata into the hot tier, creating the
    /// entry if it doesn't exist yet (e.g. called right after `create_session`
    /// alongside `replace`).
    pub fn mirror_metadata(&self, session_id: &str, metadata: Value) {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.entry(self.key(session_id)).or_insert_with(|| Entry {
            messages: Vec::new(),
            metadata: Value::Null,
            last_touched: Instant::now(),
        });
        entry.metadata = metadata;
        entry.last_touched = Instant::now();
    }

    pub fn get_metadata(&self, session_id: &str) -> Option<Value> {
        let mut sessions = self.sessions.lock().unwrap();
        let key = self.key(session_id);
        let expired = sessions
            .get(&key)
            .map(|e| e.last_touched.elapsed() > self.config.ttl)
            .unwrap_or(false);
        if expired {
            sessions.remove(&key);
            return None;
        }
        sessions.get(&key).map(|e| e.metadata.clone())
    }

    /// Whether `session_id` currently has a live (non-expired) hot-tier
    /// entry — the `is_hot` flag on [`crate::Session`].
    pub fn contains(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        let key = self.key(session_id);
        let expired = sessions
            .get(&key)
            .map(|e| e.last_touched.elapsed() > self.config.ttl)
            .unwrap_or(false);
        if expired {
            sessions.remove(&key);
            return false;
        }
        sessions.contains_key(&key)
    }

    pub fn evict(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.remove(&self.key(session_id));
    }

    /// Sweep all entries whose TTL has elapsed. Intended to be called
    /// periodically from a background task.
    pub fn sweep_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, e| e.last_touched.elapsed() <= self.config.ttl);
        before - sessions.len()
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.get(session_id).map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(ttl: Duration, max_messages: usize) -> HotTier {
        HotTier::new(HotTierConfig {
            ttl,
            max_messages,
            key_prefix: "test".into(),
        })
    }

    #[test]
    fn append_and_get_round_trips() {
        let t = tier(Duration::from_secs(60), 100);
        t.append("s1", Message::user_text("hi"));
        let messages = t.get("s1").unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn missing_session_returns_none() {
        let t = tier(Duration::from_secs(60), 100);
        assert!(t.get("nope").is_none());
    }

    #[test]
    fn contains_reflects_hot_tier_occupancy() {
        let t = tier(Duration::from_secs(60), 100);
        assert!(!t.contains("s1"));
        t.append("s1", Message::user_text("hi"));
        assert!(t.contains("s1"));
        t.evict("s1");
        assert!(!t.contains("s1"));
    }

    #[test]
    fn mirror_metadata_is_retrievable_and_survives_replace() {
        let t = tier(Duration::from_secs(60), 100);
        t.mirror_metadata("s1", serde_json::json!({"name": "demo"}));
        assert_eq!(t.get_metadata("s1").unwrap()["name"], "demo");

        t.replace("s1", vec![Message::user_text("fresh")]);
        assert_eq!(t.get_metadata("s1").unwrap()["name"], "demo");
    }

    #[test]
    fn contains_is_false_after_ttl_expiry() {
        let t = tier(Duration::from_millis(1), 100);
        t.append("s1", Message::user_text("hi"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(!t.contains("s1"));
    }

    #[test]
    fn trims_to_max_messages_from_the_front() {
        let t = tier(Duration::from_secs(60), 2);
        t.append("s1", Message::user_text("one"));
        t.append("s1", Message::user_text("two"));
        t.append("s1", Message::user_text("three"));
        let messages = t.get("s1").unwrap();
        assert_eq!(messages.len(), 2);
        let Message::User { content, .. } = &messages[0] else {
            panic!("expected user message")
        };
        let crate::message::MediaContent::Text { text } = &content[0] else {
            panic!("expected text content")
        };
        assert_eq!(text, "two");
    }

    #[test]
    fn expired_entries_are_evicted_on_get() {
        let t = tier(Duration::from_millis(1), 100);
        t.append("s1", Message::user_text("hi"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(t.get("s1").is_none());
    }

    #[test]
    fn replace_overwrites_wholesale() {
        let t = tier(Duration::from_secs(60), 100);
        t.append("s1", Message::user_text("stale"));
        t.replace("s1", vec![Message::user_text("fresh")]);
        assert_eq!(t.len("s1"), 1);
    }

    #[test]
    fn sweep_expired_removes_only_stale_sessions() {
        let t = tier(Duration::from_millis(1), 100);
        t.append("s1", Message::user_text("hi"));
        std::thread::sleep(Duration::from_millis(10));
        t.append("s2", Message::user_text("fresh"));
        let removed = t.sweep_expired();
        assert_eq!(removed, 1);
        assert!(t.get("s2").is_some());
    }
}
