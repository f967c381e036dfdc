//! Per-client rate limiting using a sliding window log.
//!
//! Each (client IP, tier) pair keeps the timestamps of its requests inside the
//! current window. A request is admitted while fewer than `limit` timestamps
//! remain after dropping the ones older than the window.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::error::ApiError;
use crate::config::RateLimitConfig;
use crate::AppState;

/// Rate limit tier for different endpoint groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// Everything under /api/v1 (60 req/min default)
    Standard,
    /// Model-backed endpoints (10 req/min default)
    Ai,
    /// Credential endpoints (5 failed attempts per 15 min default)
    Auth,
}

#[derive(Debug, Clone, Copy)]
struct TierLimit {
    limit: u32,
    window: Duration,
}

/// Thread-safe rate limiter using dashmap
#[derive(Debug)]
pub struct RateLimiter {
    /// Map of (IP, Tier) -> request timestamps inside the window, oldest first
    entries: DashMap<(IpAddr, RateLimitTier), VecDeque<Instant>>,
    /// Configuration
    config: RateLimitConfig,
}

/// Information about rate limit status
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Maximum requests per window
    pub limit: u32,
    /// Seconds until the oldest request in the window expires
    pub reset_after: u64,
    /// Timestamp logged for this request, `None` when limiting is disabled
    pub recorded_at: Option<Instant>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    fn tier_limit(&self, tier: RateLimitTier) -> TierLimit {
        match tier {
            RateLimitTier::Standard => TierLimit {
                limit: self.config.standard_requests_per_window,
                window: Duration::from_secs(self.config.standard_window_seconds),
            },
            RateLimitTier::Ai => TierLimit {
                limit: self.config.ai_requests_per_window,
                window: Duration::from_secs(self.config.ai_window_seconds),
            },
            RateLimitTier::Auth => TierLimit {
                limit: self.config.auth_requests_per_window,
                window: Duration::from_secs(self.config.auth_window_seconds),
            },
        }
    }

    /// Check if a request should be allowed and record it if so.
    /// Returns `Err(retry_after_seconds)` when the request must be rejected.
    pub fn check(&self, ip: IpAddr, tier: RateLimitTier) -> Result<RateLimitInfo, u64> {
        self.check_at(ip, tier, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, tier: RateLimitTier, now: Instant) -> Result<RateLimitInfo, u64> {
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                remaining: u32::MAX,
                limit: u32::MAX,
                reset_after: 0,
                recorded_at: None,
            });
        }

        let TierLimit { limit, window } = self.tier_limit(tier);
        let mut log = self.entries.entry((ip, tier)).or_default();

        while let Some(oldest) = log.front() {
            if now.duration_since(*oldest) >= window {
                log.pop_front();
            } else {
                break;
            }
        }

        let reset_after = |log: &VecDeque<Instant>| {
            log.front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window)
                .as_secs()
                .max(1)
        };

        if (log.len() as u32) < limit {
            log.push_back(now);
            Ok(RateLimitInfo {
                remaining: limit - log.len() as u32,
                limit,
                reset_after: reset_after(&*log),
                recorded_at: Some(now),
            })
        } else {
            Err(reset_after(&*log))
        }
    }

    /// Give back the slot `check` recorded at `recorded_at`, used for tiers
    /// that only count failures. Other requests of the same client keep theirs.
    pub fn refund(&self, ip: IpAddr, tier: RateLimitTier, recorded_at: Instant) {
        if let Some(mut log) = self.entries.get_mut(&(ip, tier)) {
            if let Some(pos) = log.iter().rposition(|t| *t == recorded_at) {
                log.remove(pos);
            }
        }
    }

    /// Get the maximum requests per window for a given tier
    pub fn limit_for(&self, tier: RateLimitTier) -> u32 {
        self.tier_limit(tier).limit
    }

    /// Drop clients with no requests inside their window
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|(_, tier), log| {
            let window = self.tier_limit(*tier).window;
            log.back()
                .map(|newest| now.duration_since(*newest) < window)
                .unwrap_or(false)
        });
    }

    /// Get the number of tracked entries (for monitoring)
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Extract the client address: proxy headers first, then the socket, then loopback
pub fn extract_client_ip(request: &Request<Body>) -> IpAddr {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(ip_str) = value.split(',').next() {
                if let Ok(ip) = ip_str.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip();
    }

    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Rate limiting middleware for general API endpoints
pub async fn rate_limit_standard(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_tier(state, request, next, RateLimitTier::Standard).await
}

/// Rate limiting middleware for model-backed endpoints
pub async fn rate_limit_ai(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_tier(state, request, next, RateLimitTier::Ai).await
}

/// Rate limiting middleware for credential endpoints
pub async fn rate_limit_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_tier(state, request, next, RateLimitTier::Auth).await
}

/// Core rate limiting logic
async fn rate_limit_with_tier(
    state: Arc<AppState>,
    request: Request<Body>,
    next: Next,
    tier: RateLimitTier,
) -> Response {
    let ip = extract_client_ip(&request);

    match state.rate_limiter.check(ip, tier) {
        Ok(info) => {
            let mut response = next.run(request).await;

            // Auth only counts failed attempts
            if tier == RateLimitTier::Auth && response.status().is_success() {
                if let Some(recorded_at) = info.recorded_at {
                    state.rate_limiter.refund(ip, tier, recorded_at);
                }
            }

            if state.config.rate_limit.enabled {
                let headers = response.headers_mut();
                headers.insert("X-RateLimit-Limit", HeaderValue::from(info.limit));
                headers.insert("X-RateLimit-Remaining", HeaderValue::from(info.remaining));
                headers.insert("X-RateLimit-Reset", HeaderValue::from(info.reset_after));
            }
            response
        }
        Err(retry_after) => {
            tracing::debug!(client = %ip, ?tier, retry_after, "Rate limit exceeded");
            metrics::counter!(super::metrics::RATE_LIMIT_REJECTIONS_TOTAL, "tier" => format!("{:?}", tier))
                .increment(1);

            let mut response = ApiError::rate_limited(retry_after).into_response();
            let headers = response.headers_mut();
            headers.insert("Retry-After", HeaderValue::from(retry_after));
            headers.insert(
                "X-RateLimit-Limit",
                HeaderValue::from(state.rate_limiter.limit_for(tier)),
            );
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(retry_after));
            response
        }
    }
}

/// Spawn a background task that drops idle clients every `cleanup_interval_secs`
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                "Rate limiter cleanup complete, {} entries remaining",
                rate_limiter.entry_count()
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            standard_requests_per_window: 10,
            standard_window_seconds: 60,
            ai_requests_per_window: 3,
            ai_window_seconds: 60,
            auth_requests_per_window: 5,
            auth_window_seconds: 900,
            cleanup_interval: 60,
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_blocks_after_limit_and_reports_remaining() {
        let limiter = RateLimiter::new(test_config());
        let client = ip("192.168.1.1");

        for i in 0..10 {
            let info = limiter.check(client, RateLimitTier::Standard).unwrap();
            assert_eq!(info.remaining, 9 - i);
            assert_eq!(info.limit, 10);
        }

        let retry_after = limiter.check(client, RateLimitTier::Standard).unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 60);
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(test_config());
        let client = ip("10.0.0.1");
        let start = Instant::now();

        for offset in 0..3 {
            assert!(limiter
                .check_at(client, RateLimitTier::Ai, start + Duration::from_secs(offset * 10))
                .is_ok());
        }
        assert!(limiter
            .check_at(client, RateLimitTier::Ai, start + Duration::from_secs(59))
            .is_err());

        // The first request leaves the window at t=60, freeing exactly one slot
        assert!(limiter
            .check_at(client, RateLimitTier::Ai, start + Duration::from_secs(60))
            .is_ok());
        assert!(limiter
            .check_at(client, RateLimitTier::Ai, start + Duration::from_secs(61))
            .is_err());
    }

    #[test]
    fn test_clients_and_tiers_are_independent() {
        let limiter = RateLimiter::new(test_config());
        let a = ip("192.168.1.1");
        let b = ip("192.168.1.2");

        for _ in 0..3 {
            limiter.check(a, RateLimitTier::Ai).unwrap();
        }
        assert!(limiter.check(a, RateLimitTier::Ai).is_err());
        assert!(limiter.check(b, RateLimitTier::Ai).is_ok());
        assert!(limiter.check(a, RateLimitTier::Standard).is_ok());
    }

    #[test]
    fn test_refund_frees_slot() {
        let limiter = RateLimiter::new(test_config());
        let client = ip("172.16.0.5");

        for _ in 0..5 {
            let info = limiter.check(client, RateLimitTier::Auth).unwrap();
            limiter.refund(client, RateLimitTier::Auth, info.recorded_at.unwrap());
        }
        for _ in 0..5 {
            limiter.check(client, RateLimitTier::Auth).unwrap();
        }
        assert!(limiter.check(client, RateLimitTier::Auth).is_err());
    }

    #[test]
    fn test_refund_removes_only_its_own_slot() {
        let limiter = RateLimiter::new(test_config());
        let client = ip("172.16.0.9");
        let start = Instant::now();

        // A success that started first finishes after a later failure
        let success = limiter.check_at(client, RateLimitTier::Auth, start).unwrap();
        let failure = limiter
            .check_at(client, RateLimitTier::Auth, start + Duration::from_secs(1))
            .unwrap();
        limiter.refund(client, RateLimitTier::Auth, success.recorded_at.unwrap());

        let log = limiter.entries.get(&(client, RateLimitTier::Auth)).unwrap().clone();
        assert_eq!(log, VecDeque::from(vec![failure.recorded_at.unwrap()]));

        // Refunding a slot that already left the log is a no-op
        limiter.refund(client, RateLimitTier::Auth, start);
        assert_eq!(limiter.entries.get(&(client, RateLimitTier::Auth)).unwrap().len(), 1);
    }

    #[test]
    fn test_disabled_allows_everything() {
        let mut config = test_config();
        config.enabled = false;
        let limiter = RateLimiter::new(config);

        for _ in 0..100 {
            assert!(limiter.check(ip("192.168.1.1"), RateLimitTier::Ai).is_ok());
        }
        assert_eq!(limiter.entry_count(), 0);
    }

    #[test]
    fn test_cleanup_keeps_active_clients() {
        let limiter = RateLimiter::new(test_config());
        limiter.check(ip("192.168.1.1"), RateLimitTier::Standard).unwrap();
        let info = limiter.check(ip("192.168.1.2"), RateLimitTier::Standard).unwrap();
        limiter.refund(ip("192.168.1.2"), RateLimitTier::Standard, info.recorded_at.unwrap());

        limiter.cleanup_expired();
        assert_eq!(limiter.entry_count(), 1);
    }

    #[test]
    fn test_client_ip_precedence() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&request), ip("203.0.113.7"));

        let request = Request::builder()
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&request), ip("198.51.100.2"));

        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_client_ip(&request), ip("127.0.0.1"));
    }
}
