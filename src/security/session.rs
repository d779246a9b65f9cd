use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};

use super::csrf::CsrfToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Active,
    IdleExpired,
    BindingMismatch,
    RateLimited,
}

/// Who is acting, as recorded in audit entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub username: String,
    pub role: String,
    pub session_id: String,
}

/// Transport facts about the inbound request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub method: String,
    pub path: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

impl RequestMeta {
    /// GET, HEAD and OPTIONS never change state
    pub fn is_state_changing(&self) -> bool {
        !matches!(self.method.to_ascii_uppercase().as_str(), "GET" | "HEAD" | "OPTIONS")
    }
}

pub fn fingerprint(user_agent: &str) -> String {
    format!("{:x}", Sha256::digest(user_agent.as_bytes()))
}

/// Security state owned by one logical session and passed explicitly into
/// every gate and pipeline call.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub actor: Actor,
    state: SessionState,
    csrf: CsrfToken,
    user_agent_fingerprint: Option<String>,
    bound_ip: Option<String>,
    last_activity: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(actor: Actor, now: DateTime<Utc>, csrf_ttl: Duration) -> Self {
        Self {
            actor,
            state: SessionState::Active,
            csrf: CsrfToken::generate(now, csrf_ttl),
            user_agent_fingerprint: None,
            bound_ip: None,
            last_activity: now,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.actor.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_invalidated(&self) -> bool {
        matches!(
            self.state,
            SessionState::Unauthenticated | SessionState::IdleExpired | SessionState::BindingMismatch
        )
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn csrf(&self) -> &CsrfToken {
        &self.csrf
    }

    /// Current token, rotated first when it has expired
    pub fn csrf_token(&mut self, now: DateTime<Utc>, ttl: Duration) -> &CsrfToken {
        if self.csrf.is_expired(now) {
            tracing::debug!(session_id = %self.actor.session_id, "rotating expired csrf token");
            self.csrf = CsrfToken::generate(now, ttl);
        }
        &self.csrf
    }

    pub fn bound_fingerprint(&self) -> Option<&str> {
        self.user_agent_fingerprint.as_deref()
    }

    pub fn bound_ip(&self) -> Option<&str> {
        self.bound_ip.as_deref()
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub(crate) fn bind(&mut self, fingerprint: Option<String>, ip: Option<String>) {
        if self.user_agent_fingerprint.is_none() {
            self.user_agent_fingerprint = fingerprint;
        }
        if self.bound_ip.is_none() {
            self.bound_ip = ip;
        }
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }
}

pub type SharedSession = Arc<Mutex<SessionContext>>;

struct RegisteredSession {
    session: SharedSession,
    /// Past this instant no token for the session is accepted
    expires_at: DateTime<Utc>,
}

/// All live sessions by id. Each session sits behind its own lock, so
/// different actors never contend and one session is mutated by one request
/// at a time.
///
/// A session is kept, invalidated or not, until its token can no longer be
/// presented; it is swept when the next session opens.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, RegisteredSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing session for `actor.session_id`, or a fresh `Active` one.
    /// Invalidated sessions are returned as-is and never revived.
    pub async fn get_or_create(
        &self,
        actor: Actor,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
        csrf_ttl: Duration,
    ) -> SharedSession {
        {
            let sessions = self.sessions.read().await;
            if let Some(registered) = sessions.get(&actor.session_id) {
                return registered.session.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, registered| registered.expires_at > now || *id == actor.session_id);
        if sessions.len() < before {
            tracing::debug!(evicted = before - sessions.len(), "expired sessions swept");
        }

        sessions
            .entry(actor.session_id.clone())
            .or_insert_with(|| {
                tracing::info!(username = %actor.username, session_id = %actor.session_id, "session opened");
                RegisteredSession {
                    session: Arc::new(Mutex::new(SessionContext::new(actor, now, csrf_ttl))),
                    expires_at,
                }
            })
            .session
            .clone()
    }

    pub async fn get(&self, session_id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(session_id).map(|r| r.session.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
