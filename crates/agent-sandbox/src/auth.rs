// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! HTTP bearer-token authentication middleware and per-IP rate limiting for
//! the sandbox service's `/v1` routes.
//!
//! Grounded directly on the gateway's own bearer-auth pattern: the raw token
//! is hashed with SHA-256 and compared with [`subtle::ConstantTimeEq`] to
//! avoid a timing oracle, rate limiting only counts failed attempts (via the
//! `governor` crate, keyed per IP), and loopback callers are exempt. This
//! service takes its token from `PlatformConfig::bearer_token` at startup
//! rather than generating and persisting one, since the token here is
//! operator-configured rather than minted per install.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

type IpLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

/// SHA-256 hash of the configured bearer token. Never stores the raw token.
#[derive(Clone)]
pub struct StoredToken([u8; 32]);

impl StoredToken {
    pub fn hash(raw: &str) -> Self {
        let digest = Sha256::digest(raw.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn verify(&self, provided: &str) -> bool {
        let digest = Sha256::digest(provided.as_bytes());
        self.0.ct_eq(&digest[..]).into()
    }
}

/// Shared auth state threaded through axum middleware. `None` means auth is
/// disabled (no `bearer_token` configured) — only appropriate for local dev.
#[derive(Clone)]
pub struct AuthState {
    token_hash: Option<Arc<StoredToken>>,
    limiter: Arc<IpLimiter>,
}

impl AuthState {
    pub fn new(bearer_token: Option<&str>, max_per_minute: u32, burst: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(max_per_minute).unwrap_or(NonZeroU32::new(5).unwrap()))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::new(2).unwrap()));
        Self {
            token_hash: bearer_token.map(|t| Arc::new(StoredToken::hash(t))),
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    pub fn with_defaults(bearer_token: Option<&str>) -> Self {
        Self::new(bearer_token, 5, 2)
    }

    pub fn auth_disabled(&self) -> bool {
        self.token_hash.is_none()
    }
}

pub trait AsAuthState {
    fn auth_state(&self) -> &AuthState;
}

impl AsAuthState for AuthState {
    fn auth_state(&self) -> &AuthState {
        self
    }
}

pub async fn bearer_auth_mw<S>(State(state): State<S>, ConnectInfo(addr): ConnectInfo<SocketAddr>, req: Request, next: Next) -> Response
where
    S: AsAuthState + Clone + Send + Sync + 'static,
{
    let auth = state.auth_state();
    verify_bearer(auth, addr.ip(), req, next).await
}

/// Rate limiting applies only to failed auth attempts, so legitimate clients
/// are never throttled by their own traffic. Loopback is exempt.
pub async fn verify_bearer(auth: &AuthState, ip: IpAddr, req: Request, next: Next) -> Response {
    if let Some(token_hash) = &auth.token_hash {
        let provided = extract_bearer(req.headers());
        match provided {
            Some(token) if token_hash.verify(token) => return next.run(req).await,
            _ => {
                if !is_loopback(ip) && auth.limiter.check_key(&ip).is_err() {
                    warn!(%ip, "rate limit exceeded after repeated auth failures");
                    return (StatusCode::TOO_MANY_REQUESTS, [(axum::http::header::RETRY_AFTER, "60")], "Too Many Requests").into_response();
                }
                warn!(%ip, "authentication failed");
                return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
            }
        }
    }
    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ")
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4 == Ipv4Addr::LOCALHOST,
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_from_valid_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer my-token-123".parse().unwrap());
        assert_eq!(extract_bearer(&headers), Some("my-token-123"));
    }

    #[test]
    fn extract_bearer_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert!(extract_bearer(&headers).is_none());
    }

    #[test]
    fn loopback_v4_and_v6_are_loopback() {
        assert!(is_loopback(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(is_loopback(IpAddr::V6(std::net::Ipv6Addr::LOCALHOST)));
    }

    #[test]
    fn non_loopback_is_not_loopback() {
        assert!(!is_loopback("192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn token_hash_verifies_correct_token_and_rejects_wrong_one() {
        let hash = StoredToken::hash("s3cr3t");
        assert!(hash.verify("s3cr3t"));
        assert!(!hash.verify("definitely-not-it"));
    }

    #[test]
    fn auth_disabled_when_no_token_configured() {
        let state = AuthState::with_defaults(None);
        assert!(state.auth_disabled());
    }
}
