// crates/partid-rpc/src/middleware.rs
//
// Middleware for the RPC server: logging interceptor and per-client
// token-bucket rate limiter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tonic::{Request, Status};

/// Header a client may set to get its own rate-limit bucket.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Logging interceptor for tonic requests.
pub fn logging_interceptor(req: Request<()>) -> Result<Request<()>, Status> {
    tracing::debug!("Incoming RPC request: {:?}", req.metadata());
    Ok(req)
}

/// Rate limit settings. `max_rps == 0` disables limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained requests per second per client.
    #[serde(default = "default_max_rps")]
    pub max_rps: u32,
    /// Requests allowed in a burst.
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

fn default_max_rps() -> u32 {
    100
}

fn default_burst_size() -> u32 {
    200
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_rps: default_max_rps(),
            burst_size: default_burst_size(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Token-bucket rate limiter keyed by client id. Clones share buckets.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Take one token for `client_id` if available.
    pub fn check_rate_limit(&self, client_id: &str) -> bool {
        self.check_at(client_id, Instant::now())
    }

    fn check_at(&self, client_id: &str, now: Instant) -> bool {
        if self.config.max_rps == 0 {
            return true;
        }
        let capacity = f64::from(self.config.burst_size.max(1));
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets.entry(client_id.to_string()).or_insert(Bucket {
            tokens: capacity,
            refilled_at: now,
        });

        let elapsed = now.saturating_duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * f64::from(self.config.max_rps)).min(capacity);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            tracing::warn!(client_id, "RPC rate limit exceeded");
            false
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
