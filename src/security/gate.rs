use chrono::{DateTime, Utc};

use super::error::{GateError, InvalidReason};
use super::rate_limit::{RateDecision, RateLimiter};
use super::session::{fingerprint, RequestMeta, SessionContext, SessionState};
use crate::config::SecurityConfig;

/// Pre-conditions every query-executing or state-changing request must meet.
///
/// Checks run in a fixed order: session validity, rate limit, binding, idle
/// timeout, CSRF. Each one has its own toggle and none depends on another
/// being enabled. Binding and idle failures invalidate the session for good;
/// a rate-limit lockout lifts once it expires.
#[derive(Clone)]
pub struct SecurityGate {
    config: SecurityConfig,
    limiter: RateLimiter,
}

impl SecurityGate {
    pub fn new(config: SecurityConfig) -> Self {
        let limiter = RateLimiter::new(
            config.rate_limit_requests,
            chrono::Duration::seconds(config.rate_limit_window_secs.min(i64::MAX as u64) as i64),
            chrono::Duration::seconds(config.rate_limit_lockout_secs.min(i64::MAX as u64) as i64),
        );
        Self { config, limiter }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    pub fn check(
        &self,
        session: &mut SessionContext,
        request: &RequestMeta,
        csrf_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), GateError> {
        match session.state() {
            SessionState::Unauthenticated => return Err(GateError::SessionInvalid(InvalidReason::Unauthenticated)),
            SessionState::IdleExpired => return Err(GateError::SessionInvalid(InvalidReason::IdleExpired)),
            SessionState::BindingMismatch => return Err(GateError::SessionInvalid(InvalidReason::BindingMismatch)),
            SessionState::Active | SessionState::RateLimited => {}
        }

        if self.config.rate_limit_enabled {
            self.check_rate(session, now)?;
        }
        if self.config.session_binding_enabled {
            self.check_binding(session, request)?;
        }
        if self.config.idle_timeout_enabled {
            self.check_idle(session, now)?;
        }
        if self.config.csrf_enabled && request.is_state_changing() {
            self.check_csrf(session, csrf_token, now)?;
        }

        session.touch(now);
        Ok(())
    }

    fn check_rate(&self, session: &mut SessionContext, now: DateTime<Utc>) -> Result<(), GateError> {
        match self.limiter.check(&session.actor.username, now) {
            RateDecision::Allowed => {
                if session.state() == SessionState::RateLimited {
                    session.set_state(SessionState::Active);
                }
                Ok(())
            }
            RateDecision::Limited { until } => {
                if session.state() != SessionState::RateLimited {
                    tracing::warn!(username = %session.actor.username, %until, "rate limit lockout");
                }
                session.set_state(SessionState::RateLimited);
                Err(GateError::RateLimited { retry_after: until })
            }
        }
    }

    fn check_binding(&self, session: &mut SessionContext, request: &RequestMeta) -> Result<(), GateError> {
        let presented_fingerprint = request.user_agent.as_deref().map(fingerprint);
        let presented_ip = if self.config.bind_ip { request.ip.clone() } else { None };

        let fingerprint_changed = session
            .bound_fingerprint()
            .map_or(false, |bound| presented_fingerprint.as_deref() != Some(bound));
        let ip_changed = self.config.bind_ip
            && session
                .bound_ip()
                .map_or(false, |bound| presented_ip.as_deref() != Some(bound));

        if fingerprint_changed || ip_changed {
            tracing::warn!(
                username = %session.actor.username,
                session_id = %session.session_id(),
                fingerprint_changed,
                ip_changed,
                "session binding mismatch; invalidating session"
            );
            session.set_state(SessionState::BindingMismatch);
            return Err(GateError::SessionInvalid(InvalidReason::BindingMismatch));
        }

        session.bind(presented_fingerprint, presented_ip);
        Ok(())
    }

    fn check_idle(&self, session: &mut SessionContext, now: DateTime<Utc>) -> Result<(), GateError> {
        if now - session.last_activity() > self.config.idle_timeout() {
            tracing::info!(username = %session.actor.username, "session idle timeout");
            session.set_state(SessionState::IdleExpired);
            return Err(GateError::SessionInvalid(InvalidReason::IdleExpired));
        }
        Ok(())
    }

    fn check_csrf(&self, session: &SessionContext, presented: Option<&str>, now: DateTime<Utc>) -> Result<(), GateError> {
        match presented {
            Some(token) if session.csrf().verify(token.trim(), now) => Ok(()),
            _ => Err(GateError::Csrf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::security::session::Actor;
    use chrono::Duration;

    fn config() -> SecurityConfig {
        let mut config = AppConfig::production().security;
        config.rate_limit_requests = 100;
        config
    }

    fn session(now: DateTime<Utc>, config: &SecurityConfig) -> SessionContext {
        let actor = Actor {
            username: "ann".into(),
            role: "admin".into(),
            session_id: "s1".into(),
        };
        SessionContext::new(actor, now, config.csrf_token_ttl())
    }

    fn post(user_agent: &str, ip: &str) -> RequestMeta {
        RequestMeta {
            method: "POST".into(),
            path: "/api/query/shop/users".into(),
            ip: Some(ip.into()),
            user_agent: Some(user_agent.into()),
            referer: None,
        }
    }

    #[test]
    fn csrf_required_on_state_changing_requests() {
        let config = config();
        let gate = SecurityGate::new(config.clone());
        let now = Utc::now();
        let mut session = session(now, &config);
        let token = session.csrf().value().to_string();

        assert_eq!(gate.check(&mut session, &post("ua", "1.1.1.1"), None, now), Err(GateError::Csrf));
        assert_eq!(gate.check(&mut session, &post("ua", "1.1.1.1"), Some("forged"), now), Err(GateError::Csrf));
        assert_eq!(gate.check(&mut session, &post("ua", "1.1.1.1"), Some(&token), now), Ok(()));

        let get = RequestMeta {
            method: "GET".into(),
            ..post("ua", "1.1.1.1")
        };
        assert_eq!(gate.check(&mut session, &get, None, now), Ok(()));
        // CSRF failures do not invalidate the session
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn ip_change_invalidates_when_ip_binding_enabled() {
        let config = config();
        let gate = SecurityGate::new(config.clone());
        let now = Utc::now();
        let mut session = session(now, &config);
        let token = session.csrf().value().to_string();

        assert!(gate.check(&mut session, &post("ua", "1.1.1.1"), Some(&token), now).is_ok());
        assert_eq!(
            gate.check(&mut session, &post("ua", "2.2.2.2"), Some(&token), now),
            Err(GateError::SessionInvalid(InvalidReason::BindingMismatch))
        );
        // stays invalid even when the original IP comes back
        assert!(gate.check(&mut session, &post("ua", "1.1.1.1"), Some(&token), now).is_err());
    }

    #[test]
    fn ip_change_ignored_without_ip_binding() {
        let mut config = config();
        config.bind_ip = false;
        let gate = SecurityGate::new(config.clone());
        let now = Utc::now();
        let mut session = session(now, &config);
        let token = session.csrf().value().to_string();

        assert!(gate.check(&mut session, &post("ua", "1.1.1.1"), Some(&token), now).is_ok());
        assert!(gate.check(&mut session, &post("ua", "2.2.2.2"), Some(&token), now).is_ok());
    }

    #[test]
    fn idle_timeout_is_clamped_and_invalidates() {
        let mut config = config();
        config.idle_timeout_secs = 1; // clamped up to the 60s minimum
        let gate = SecurityGate::new(config.clone());
        let now = Utc::now();
        let mut session = session(now, &config);
        let token = session.csrf().value().to_string();

        let soon = now + Duration::seconds(30);
        assert!(gate.check(&mut session, &post("ua", "1.1.1.1"), Some(&token), soon).is_ok());

        let late = soon + Duration::seconds(61);
        assert_eq!(
            gate.check(&mut session, &post("ua", "1.1.1.1"), Some(&token), late),
            Err(GateError::SessionInvalid(InvalidReason::IdleExpired))
        );
        assert_eq!(session.state(), SessionState::IdleExpired);
    }

    #[test]
    fn disabled_checks_are_skipped_independently() {
        let mut config = config();
        config.csrf_enabled = false;
        config.idle_timeout_enabled = false;
        let gate = SecurityGate::new(config.clone());
        let now = Utc::now();
        let mut session = session(now, &config);

        let much_later = now + Duration::days(30);
        assert!(gate.check(&mut session, &post("ua", "1.1.1.1"), None, much_later).is_ok());
        // binding is still enforced
        assert!(gate.check(&mut session, &post("other", "1.1.1.1"), None, much_later).is_err());
    }

    #[test]
    fn rate_limited_session_recovers_after_lockout() {
        let mut config = config();
        config.rate_limit_requests = 1;
        config.rate_limit_lockout_secs = 60;
        let gate = SecurityGate::new(config.clone());
        let now = Utc::now();
        let mut session = session(now, &config);
        let token = session.csrf().value().to_string();
        let request = post("ua", "1.1.1.1");

        assert!(gate.check(&mut session, &request, Some(&token), now).is_ok());
        assert!(matches!(
            gate.check(&mut session, &request, Some(&token), now),
            Err(GateError::RateLimited { .. })
        ));
        assert_eq!(session.state(), SessionState::RateLimited);

        let after = now + Duration::seconds(60);
        assert!(gate.check(&mut session, &request, Some(&token), after).is_ok());
        assert_eq!(session.state(), SessionState::Active);
    }
}
