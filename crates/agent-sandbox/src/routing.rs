// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Consistent-hash routing of sessions to sandbox pods, so horizontal
//! scaling (multiple `agent-sandbox` processes behind a load balancer) keeps
//! a given session's calls landing on the pod holding its bound VM.

/// Picks a pod URL for `session_id` out of `pods` by MD5-hashing the session
/// id and reducing modulo the pod count. Same session, same pod list, same
/// pod every time; pods must be given in a stable order (see
/// [`agent_config::PlatformConfig::all_pod_urls`]).
pub fn route(session_id: &str, pods: &[String]) -> Option<&String> {
    if pods.is_empty() {
        return None;
    }
    let digest = md5::compute(session_id.as_bytes());
    let bucket = u128::from_be_bytes(digest.0) % pods.len() as u128;
    pods.get(bucket as usize)
}

/// Whether `pod_url` is this process's own address, i.e. whether a routed
/// request should be served locally rather than proxied.
pub fn is_local(pod_url: &str, self_url: &str) -> bool {
    pod_url.trim_end_matches('/') == self_url.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_stable_for_the_same_session_id() {
        let pods = vec!["http://a".to_string(), "http://b".to_string(), "http://c".to_string()];
        let first = route("session-123", &pods).cloned();
        let second = route("session-123", &pods).cloned();
        assert_eq!(first, second);
    }

    #[test]
    fn routing_distributes_across_pods() {
        let pods = vec!["http://a".to_string(), "http://b".to_string(), "http://c".to_string()];
        let mut seen = std::collections::HashSet::new();
        for i in 0..50 {
            let session_id = format!("session-{i}");
            if let Some(pod) = route(&session_id, &pods) {
                seen.insert(pod.clone());
            }
        }
        assert!(seen.len() > 1, "expected sessions to spread across more than one pod");
    }

    #[test]
    fn empty_pod_list_routes_to_none() {
        assert_eq!(route("session-1", &[]), None);
    }

    #[test]
    fn single_pod_always_wins() {
        let pods = vec!["http://only".to_string()];
        assert_eq!(route("anything", &pods), Some(&pods[0]));
    }

    #[test]
    fn is_local_ignores_trailing_slash() {
        assert!(is_local("http://a:8088/", "http://a:8088"));
        assert!(!is_local("http://a:8088", "http://b:8088"));
    }
}
