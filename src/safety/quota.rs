//! Quota Limiter
//!
//! Minute and day request windows per client identity. Paid plans bypass
//! the check entirely; free callers get a short delay as the day window
//! fills up and a hard stop once either window is exhausted.

use axum::http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::store::{Clock, Store};

/// Upper bound on the soft backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub enabled: bool,
    pub per_min: u32,
    pub per_day: u32,
    pub backoff_frac: f64,
    pub backoff: Duration,
    pub plan_header: String,
    pub free_plans: Vec<String>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_min: 60,
            per_day: 800,
            backoff_frac: 0.9,
            backoff: MAX_BACKOFF,
            plan_header: "x-plan".to_string(),
            free_plans: vec!["free".to_string(), "trial".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuotaDecision {
    /// Quotas disabled or paid caller.
    Bypass,
    Allow {
        limit: u32,
        remaining: u32,
        backoff: Option<Duration>,
    },
    Deny {
        limit: u32,
        retry_after_secs: u64,
    },
}

pub struct QuotaLimiter {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: QuotaConfig,
}

impl QuotaLimiter {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, mut config: QuotaConfig) -> Self {
        config.per_min = config.per_min.max(1);
        config.per_day = config.per_day.max(1);
        config.backoff_frac = config.backoff_frac.min(0.99);
        config.backoff = config.backoff.min(MAX_BACKOFF);
        config.plan_header = config.plan_header.to_lowercase();
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// First `x-forwarded-for` hop joined with the session id header.
    pub fn identity(headers: &HeaderMap) -> String {
        let ip = header_str(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("ip:unknown");
        let session = header_str(headers, "x-session-id").unwrap_or("anon");
        format!("{}|{}", ip, session)
    }

    pub fn is_paid(&self, headers: &HeaderMap) -> bool {
        header_str(headers, &self.config.plan_header)
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .map(|p| !self.config.free_plans.iter().any(|f| *f == p))
            .unwrap_or(false)
    }

    pub fn check(&self, headers: &HeaderMap) -> QuotaDecision {
        if !self.config.enabled || self.is_paid(headers) {
            return QuotaDecision::Bypass;
        }
        self.check_identity(&Self::identity(headers))
    }

    /// Consumes one request for `identity` unless a window is exhausted.
    pub fn check_identity(&self, identity: &str) -> QuotaDecision {
        let now = self.clock.now_ms();
        let (per_min, per_day) = (self.config.per_min, self.config.per_day);
        let mut admitted = false;
        let (minute, day) = self.store.update_buckets(identity, now, &mut |minute, day| {
            if minute.count < per_min && day.count < per_day {
                minute.count += 1;
                day.count += 1;
                admitted = true;
            }
        });

        if !admitted {
            let minute_full = minute.count >= per_min;
            let day_full = day.count >= per_day;
            // wait for every exhausted window
            let reset_at = match (minute_full, day_full) {
                (true, true) => minute.reset_at_ms.max(day.reset_at_ms),
                (true, false) => minute.reset_at_ms,
                _ => day.reset_at_ms,
            };
            let retry_ms = reset_at.saturating_sub(now);
            let retry_after_secs = retry_ms.div_ceil(1000).max(1);
            warn!("Quota exceeded for {} (retry in {}s)", identity, retry_after_secs);
            return QuotaDecision::Deny {
                limit: per_min,
                retry_after_secs,
            };
        }

        let frac = day.count as f64 / self.config.per_day as f64;
        let backoff = (frac >= self.config.backoff_frac && !self.config.backoff.is_zero())
            .then_some(self.config.backoff);
        if backoff.is_some() {
            debug!("Soft backoff for {} ({:.0}% of daily quota)", identity, frac * 100.0);
        }

        QuotaDecision::Allow {
            limit: self.config.per_min,
            remaining: self.config.per_min.saturating_sub(minute.count),
            backoff,
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ManualClock, MemoryStore};
    use axum::http::HeaderValue;

    fn limiter(config: QuotaConfig) -> (QuotaLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemoryStore::new(clock.clone(), 60_000, 10));
        (QuotaLimiter::new(store, clock.clone(), config), clock)
    }

    #[test]
    fn test_minute_window_denies_then_resumes() {
        let (limiter, clock) = limiter(QuotaConfig {
            per_min: 3,
            ..Default::default()
        });
        for i in 0..3 {
            match limiter.check_identity("ip|s") {
                QuotaDecision::Allow { remaining, .. } => assert_eq!(remaining, 2 - i),
                other => panic!("unexpected {:?}", other),
            }
        }
        match limiter.check_identity("ip|s") {
            QuotaDecision::Deny { retry_after_secs, .. } => assert_eq!(retry_after_secs, 60),
            other => panic!("unexpected {:?}", other),
        }

        clock.advance(Duration::from_secs(30));
        assert!(matches!(
            limiter.check_identity("ip|s"),
            QuotaDecision::Deny { retry_after_secs: 30, .. }
        ));

        clock.advance(Duration::from_secs(30));
        assert!(matches!(limiter.check_identity("ip|s"), QuotaDecision::Allow { .. }));
    }

    #[test]
    fn test_backoff_near_daily_cap() {
        let (limiter, _) = limiter(QuotaConfig {
            per_min: 100,
            per_day: 10,
            ..Default::default()
        });
        for _ in 0..8 {
            assert!(matches!(
                limiter.check_identity("id"),
                QuotaDecision::Allow { backoff: None, .. }
            ));
        }
        match limiter.check_identity("id") {
            QuotaDecision::Allow { backoff, .. } => assert_eq!(backoff, Some(MAX_BACKOFF)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_day_window_retry_after_uses_day_reset() {
        let (limiter, _) = limiter(QuotaConfig {
            per_min: 100,
            per_day: 2,
            ..Default::default()
        });
        limiter.check_identity("id");
        limiter.check_identity("id");
        match limiter.check_identity("id") {
            QuotaDecision::Deny { retry_after_secs, .. } => assert_eq!(retry_after_secs, 86_400),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_backoff_is_clamped() {
        let (limiter, _) = limiter(QuotaConfig {
            backoff: Duration::from_secs(5),
            ..Default::default()
        });
        assert_eq!(limiter.config().backoff, MAX_BACKOFF);
    }

    #[test]
    fn test_paid_plan_bypasses() {
        let (limiter, _) = limiter(QuotaConfig {
            per_min: 1,
            ..Default::default()
        });
        let mut headers = HeaderMap::new();
        headers.insert("x-plan", HeaderValue::from_static("Pro"));
        for _ in 0..5 {
            assert_eq!(limiter.check(&headers), QuotaDecision::Bypass);
        }
        headers.insert("x-plan", HeaderValue::from_static("trial"));
        assert!(matches!(limiter.check(&headers), QuotaDecision::Allow { .. }));
        assert!(matches!(limiter.check(&headers), QuotaDecision::Deny { .. }));
    }

    #[test]
    fn test_concurrent_burst_never_exceeds_minute_limit() {
        let (limiter, _) = limiter(QuotaConfig {
            per_min: 5,
            ..Default::default()
        });
        let limiter = Arc::new(limiter);
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || matches!(limiter.check_identity("burst"), QuotaDecision::Allow { .. }))
            })
            .collect();
        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(allowed, 5);
    }

    #[test]
    fn test_identity_uses_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" 10.0.0.1 , 172.16.0.1"));
        headers.insert("x-session-id", HeaderValue::from_static("abc"));
        assert_eq!(QuotaLimiter::identity(&headers), "10.0.0.1|abc");
        assert_eq!(QuotaLimiter::identity(&HeaderMap::new()), "ip:unknown|anon");
    }
}
