use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use docstore_console::{
    audit::{AuditFilter, AuditTrail, Category, MemoryAuditStore, MemoryHistoryStore, Severity},
    config::{AppConfig, SecurityConfig},
    pipeline::{PipelineError, QueryForm, QueryPipeline},
    query::QueryExecutor,
    security::{Actor, GateError, InvalidReason, RequestMeta, SecurityGate, SessionContext, SessionRegistry, SessionState},
    store::MemoryStore,
};

fn security() -> SecurityConfig {
    let mut config = AppConfig::production().security;
    config.rate_limit_requests = 3;
    config.rate_limit_window_secs = 60;
    config.rate_limit_lockout_secs = 120;
    config
}

fn actor(session_id: &str) -> Actor {
    Actor {
        username: "ann".into(),
        role: "admin".into(),
        session_id: session_id.into(),
    }
}

fn request(user_agent: &str) -> RequestMeta {
    RequestMeta {
        method: "POST".into(),
        path: "/api/query/shop/users".into(),
        ip: Some("198.51.100.4".into()),
        user_agent: Some(user_agent.into()),
        referer: None,
    }
}

fn pipeline(config: SecurityConfig) -> (QueryPipeline, Arc<AuditTrail>) {
    let query = AppConfig::production().query;
    let audit = Arc::new(AuditTrail::new(Arc::new(MemoryAuditStore::new()), 100));
    let pipeline = QueryPipeline::new(
        SecurityGate::new(config),
        QueryExecutor::new(Arc::new(MemoryStore::new()), query),
        audit.clone(),
        Arc::new(MemoryHistoryStore::new(10)),
    );
    (pipeline, audit)
}

#[tokio::test]
async fn user_agent_change_invalidates_despite_valid_csrf() -> Result<()> {
    let config = security();
    let (pipeline, audit) = pipeline(config.clone());
    let mut session = SessionContext::new(actor("s-ua"), Utc::now(), config.csrf_token_ttl());
    let form = QueryForm {
        csrf_token: Some(session.csrf().value().to_string()),
        ..Default::default()
    };

    pipeline.run_query(&mut session, &request("Firefox/120"), "shop", "users", &form).await?;

    let err = pipeline
        .run_query(&mut session, &request("curl/8.0"), "shop", "users", &form)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Gate(GateError::SessionInvalid(InvalidReason::BindingMismatch))
    ));
    assert_eq!(session.state(), SessionState::BindingMismatch);

    // The original browser cannot pick the session back up
    assert!(pipeline
        .run_query(&mut session, &request("Firefox/120"), "shop", "users", &form)
        .await
        .is_err());

    let security_entries = audit
        .query(
            &AuditFilter {
                category: Some(Category::Security),
                ..Default::default()
            },
            10,
        )
        .await?;
    assert_eq!(security_entries.len(), 2);
    assert!(security_entries.iter().any(|e| e.severity == Severity::Critical));
    assert!(security_entries.iter().all(|e| e.action == "security_gate_rejected"));
    Ok(())
}

#[test]
fn request_after_limit_is_rejected_until_lockout_ends() {
    let config = security();
    let gate = SecurityGate::new(config.clone());
    let now = Utc::now();
    let mut session = SessionContext::new(actor("s-rate"), now, config.csrf_token_ttl());
    let token = session.csrf().value().to_string();
    let meta = request("Firefox/120");

    for i in 0..3 {
        let at = now + Duration::seconds(i);
        assert!(gate.check(&mut session, &meta, Some(&token), at).is_ok(), "request {} allowed", i + 1);
    }

    let blocked_at = now + Duration::seconds(3);
    match gate.check(&mut session, &meta, Some(&token), blocked_at) {
        Err(GateError::RateLimited { retry_after }) => {
            assert_eq!(retry_after, blocked_at + Duration::seconds(120));
        }
        other => panic!("expected rate limit, got {:?}", other),
    }

    // Still locked just before the lockout ends
    assert!(gate
        .check(&mut session, &meta, Some(&token), blocked_at + Duration::seconds(119))
        .is_err());

    // Requests resume afterwards; idle timeout (15 min) is not reached
    let resumed = blocked_at + Duration::seconds(121);
    assert!(gate.check(&mut session, &meta, Some(&token), resumed).is_ok());
    assert_eq!(session.state(), SessionState::Active);
}

#[test]
fn rate_limits_are_tracked_per_actor() {
    let config = security();
    let gate = SecurityGate::new(config.clone());
    let now = Utc::now();
    let meta = request("Firefox/120");

    let mut busy = SessionContext::new(actor("s-busy"), now, config.csrf_token_ttl());
    let busy_token = busy.csrf().value().to_string();
    for _ in 0..4 {
        let _ = gate.check(&mut busy, &meta, Some(&busy_token), now);
    }
    assert_eq!(busy.state(), SessionState::RateLimited);

    let bob = Actor {
        username: "bob".into(),
        ..actor("s-quiet")
    };
    let mut quiet = SessionContext::new(bob, now, config.csrf_token_ttl());
    let quiet_token = quiet.csrf().value().to_string();
    assert!(gate.check(&mut quiet, &meta, Some(&quiet_token), now).is_ok());
}

#[tokio::test]
async fn registry_never_revives_an_invalidated_session() {
    let config = security();
    let gate = SecurityGate::new(config.clone());
    let registry = SessionRegistry::new();
    let now = Utc::now();
    let expires_at = now + chrono::Duration::hours(1);

    let shared = registry.get_or_create(actor("s-reg"), expires_at, now, config.csrf_token_ttl()).await;
    {
        let mut session = shared.lock().await;
        let token = session.csrf().value().to_string();
        assert!(gate.check(&mut session, &request("Firefox/120"), Some(&token), now).is_ok());
        assert!(gate.check(&mut session, &request("curl/8.0"), Some(&token), now).is_err());
    }

    let again = registry.get_or_create(actor("s-reg"), expires_at, now, config.csrf_token_ttl()).await;
    assert!(again.lock().await.is_invalidated());
    assert_eq!(registry.len().await, 1);
}
