//! # Per-Caller Rate Limiting
//!
//! Fixed-window rate limiter keyed by the authenticated caller. Runs inside
//! the auth middleware, so the [`CallerIdentity`] is already resolved: clients
//! are keyed by user id, admins without a user binding share one bucket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::Mutex;

use crate::auth::CallerIdentity;
use crate::error::{ErrorBody, ErrorDetail};

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u64,
    /// Window duration in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 1000,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone)]
struct BucketState {
    count: u64,
    window_start: Instant,
}

#[derive(Debug)]
struct Buckets {
    by_key: HashMap<String, BucketState>,
    last_sweep: Instant,
}

/// Shared rate limiter state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<Mutex<Buckets>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(Mutex::new(Buckets {
                by_key: HashMap::new(),
                last_sweep: Instant::now(),
            })),
        }
    }

    /// Count a request against `key`; `false` once the window is full.
    ///
    /// At most once per window, buckets whose window has ended are dropped.
    fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let window = self.config.window_secs;

        if now.duration_since(buckets.last_sweep).as_secs() >= window {
            buckets
                .by_key
                .retain(|_, b| now.duration_since(b.window_start).as_secs() < window);
            buckets.last_sweep = now;
        }

        let bucket = buckets.by_key.entry(key.to_string()).or_insert(BucketState {
            count: 0,
            window_start: now,
        });

        if now.duration_since(bucket.window_start).as_secs() >= window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        if bucket.count >= self.config.max_requests {
            false
        } else {
            bucket.count += 1;
            true
        }
    }
}

fn rate_limit_key(caller: Option<&CallerIdentity>) -> String {
    match caller {
        Some(CallerIdentity {
            user_id: Some(user),
            ..
        }) => format!("user:{user}"),
        Some(caller) => format!("role:{}", caller.role.as_str()),
        None => "anonymous".to_string(),
    }
}

/// Middleware that enforces per-caller rate limits.
pub async fn rate_limit_middleware(request: Request, next: Next) -> Response {
    let limiter = request.extensions().get::<RateLimiter>().cloned();

    if let Some(limiter) = limiter {
        let key = rate_limit_key(request.extensions().get::<CallerIdentity>());

        if !limiter.check(&key) {
            tracing::warn!(key = %key, "rate limit exceeded");
            let body = ErrorBody {
                error: ErrorDetail {
                    code: "RATE_LIMITED".to_string(),
                    message: "rate limit exceeded".to_string(),
                    details: None,
                },
            };
            return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use kc_core::UserId;

    #[test]
    fn window_caps_requests_per_key() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 2,
            window_secs: 60,
        });
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
    }

    #[test]
    fn expired_buckets_are_evicted() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 5,
            window_secs: 0,
        });
        assert!(limiter.check("a"));
        assert!(limiter.check("b"));
        assert!(limiter.check("c"));
        let keys: Vec<String> = limiter.buckets.lock().by_key.keys().cloned().collect();
        assert_eq!(keys, vec!["c".to_string()]);
    }

    #[test]
    fn live_buckets_survive_sweep() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 5,
            window_secs: 60,
        });
        limiter.check("a");
        limiter.buckets.lock().last_sweep -= std::time::Duration::from_secs(120);
        limiter.check("b");
        assert_eq!(limiter.buckets.lock().by_key.len(), 2);
    }

    #[test]
    fn key_prefers_user_binding() {
        let user = UserId::new();
        assert_eq!(
            rate_limit_key(Some(&CallerIdentity::client(user))),
            format!("user:{user}")
        );
        assert_eq!(rate_limit_key(Some(&CallerIdentity::admin())), "role:admin");
        assert_eq!(rate_limit_key(None), "anonymous");
    }
}
