use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { until: DateTime<Utc> },
}

#[derive(Debug, Default)]
struct ActorWindow {
    hits: VecDeque<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
}

/// Rolling-window limiter keyed by actor. Counting and comparing happen
/// under one lock, so concurrent requests cannot both slip under the limit.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<String, ActorWindow>>>,
    limit: u32,
    window: Duration,
    lockout: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration, lockout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            limit,
            window,
            lockout,
        }
    }

    /// Record one request for `key`. The request that would exceed the limit
    /// starts a lockout, and every request during the lockout is refused.
    pub fn check(&self, key: &str, now: DateTime<Utc>) -> RateDecision {
        if self.limit == 0 {
            return RateDecision::Allowed;
        }

        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let entry = inner.entry(key.to_string()).or_default();
        if let Some(until) = entry.locked_until {
            if now < until {
                return RateDecision::Limited { until };
            }
            entry.locked_until = None;
        }

        prune_window(&mut entry.hits, now, self.window);
        if entry.hits.len() >= self.limit as usize {
            let until = now + self.lockout;
            entry.locked_until = Some(until);
            entry.hits.clear();
            return RateDecision::Limited { until };
        }
        entry.hits.push_back(now);

        let window = self.window;
        inner.retain(|_, w| {
            prune_window(&mut w.hits, now, window);
            !w.hits.is_empty() || w.locked_until.map_or(false, |until| now < until)
        });

        RateDecision::Allowed
    }

    pub fn locked_until(&self, key: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner
            .get(key)
            .and_then(|w| w.locked_until)
            .filter(|until| now < *until)
    }
}

fn prune_window(hits: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) {
    while let Some(front) = hits.front() {
        if now - *front >= window {
            hits.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_rejects_after_limit_then_locks_out() {
        let limiter = RateLimiter::new(2, Duration::seconds(60), Duration::seconds(300));
        let t0 = Utc::now();
        assert_eq!(limiter.check("ann", t0), RateDecision::Allowed);
        assert_eq!(limiter.check("ann", t0), RateDecision::Allowed);
        assert_eq!(
            limiter.check("ann", t0),
            RateDecision::Limited { until: t0 + Duration::seconds(300) }
        );

        // The window alone elapsing is not enough while locked out
        let later = t0 + Duration::seconds(120);
        assert!(matches!(limiter.check("ann", later), RateDecision::Limited { .. }));

        let after = t0 + Duration::seconds(300);
        assert_eq!(limiter.check("ann", after), RateDecision::Allowed);
    }

    #[test]
    fn actors_are_independent() {
        let limiter = RateLimiter::new(1, Duration::seconds(60), Duration::seconds(60));
        let now = Utc::now();
        assert_eq!(limiter.check("ann", now), RateDecision::Allowed);
        assert_eq!(limiter.check("bob", now), RateDecision::Allowed);
        assert!(matches!(limiter.check("ann", now), RateDecision::Limited { .. }));
        assert!(limiter.locked_until("ann", now).is_some());
        assert!(limiter.locked_until("bob", now).is_none());
    }

    #[test]
    fn hits_expire_with_the_window() {
        let limiter = RateLimiter::new(1, Duration::seconds(10), Duration::seconds(60));
        let now = Utc::now();
        assert_eq!(limiter.check("ann", now), RateDecision::Allowed);
        assert_eq!(limiter.check("ann", now + Duration::seconds(10)), RateDecision::Allowed);
    }

    #[test]
    fn zero_limit_disables_counting() {
        let limiter = RateLimiter::new(0, Duration::seconds(1), Duration::seconds(1));
        let now = Utc::now();
        for _ in 0..100 {
            assert_eq!(limiter.check("ann", now), RateDecision::Allowed);
        }
    }
}
