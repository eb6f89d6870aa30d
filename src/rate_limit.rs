use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding window in-memory rate limiter (pod local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            enabled,
        }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled {
            return true;
        }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Convenience wrapper holding per-action config derived from env.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub login_limit: usize,
    pub login_window: Duration,
    pub register_limit: usize,
    pub register_window: Duration,
    pub post_limit: usize,
    pub post_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        fn dur_env(name: &str, default: u64) -> Duration {
            Duration::from_secs(
                std::env::var(name)
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default),
            )
        }
        Self {
            login_limit: usize_env("RL_LOGIN_LIMIT", 10),
            login_window: dur_env("RL_LOGIN_WINDOW", 300),
            register_limit: usize_env("RL_REGISTER_LIMIT", 5),
            register_window: dur_env("RL_REGISTER_WINDOW", 3600),
            post_limit: usize_env("RL_POST_LIMIT", 10),
            post_window: dur_env("RL_POST_WINDOW", 600),
        }
    }
}

/// High level guard used by handlers.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self {
        Self { limiter, cfg }
    }
    pub fn allow_login(&self, ip: &str) -> bool {
        self.limiter
            .check(&format!("login:{ip}"), self.cfg.login_limit, self.cfg.login_window)
    }
    pub fn allow_register(&self, ip: &str) -> bool {
        self.limiter.check(
            &format!("register:{ip}"),
            self.cfg.register_limit,
            self.cfg.register_window,
        )
    }
    pub fn allow_post_create(&self, ip: &str) -> bool {
        self.limiter
            .check(&format!("post:{ip}"), self.cfg.post_limit, self.cfg.post_window)
    }
}
