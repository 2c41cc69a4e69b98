//! Per-user sliding-window rate limiter for inbound chat messages.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use hermes_domain::config::RateLimitConfig;

pub struct RateLimiter {
    config: RateLimitConfig,
    requests: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request attempt. `Err` carries the user-facing refusal.
    pub fn check_request(&self, user: &str) -> Result<(), String> {
        let now = Instant::now();
        let hour = Duration::from_secs(3_600);
        let minute = Duration::from_secs(60);

        let mut requests = self.requests.lock();
        let window = requests.entry(user.to_string()).or_default();
        window.retain(|t| now.duration_since(*t) < hour);

        let last_minute = window
            .iter()
            .filter(|t| now.duration_since(**t) < minute)
            .count();
        if last_minute >= self.config.requests_per_minute {
            return Err(format!(
                "Limite de {} mensagens por minuto atingido. Aguarde um momento.",
                self.config.requests_per_minute
            ));
        }
        if window.len() >= self.config.requests_per_hour {
            return Err(format!(
                "Limite de {} mensagens por hora atingido.",
                self.config.requests_per_hour
            ));
        }

        window.push(now);
        Ok(())
    }

    /// Drop users whose whole window has expired.
    pub fn prune_idle(&self) {
        let now = Instant::now();
        let hour = Duration::from_secs(3_600);
        self.requests
            .lock()
            .retain(|_, window| window.iter().any(|t| now.duration_since(*t) < hour));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_minute: usize, per_hour: usize) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            requests_per_minute: per_minute,
            requests_per_hour: per_hour,
        })
    }

    #[test]
    fn allows_up_to_the_minute_limit() {
        let limiter = limiter(3, 100);
        for _ in 0..3 {
            assert!(limiter.check_request("u").is_ok());
        }
        let refusal = limiter.check_request("u").unwrap_err();
        assert!(refusal.contains("por minuto"));
    }

    #[test]
    fn users_are_limited_independently() {
        let limiter = limiter(1, 100);
        assert!(limiter.check_request("a").is_ok());
        assert!(limiter.check_request("b").is_ok());
        assert!(limiter.check_request("a").is_err());
    }

    #[test]
    fn hour_limit_applies_when_minute_limit_is_loose() {
        let limiter = limiter(100, 2);
        assert!(limiter.check_request("u").is_ok());
        assert!(limiter.check_request("u").is_ok());
        let refusal = limiter.check_request("u").unwrap_err();
        assert!(refusal.contains("por hora"));
    }

    #[test]
    fn prune_keeps_active_users() {
        let limiter = limiter(10, 10);
        limiter.check_request("u").unwrap();
        limiter.prune_idle();
        assert_eq!(limiter.requests.lock().len(), 1);
    }
}
