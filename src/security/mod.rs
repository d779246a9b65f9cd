//! Request security gate: CSRF, session binding, idle timeout and rate
//! limiting, plus the per-session state those checks mutate.

pub mod capability;
pub mod csrf;
pub mod error;
pub mod gate;
pub mod rate_limit;
pub mod session;

pub use capability::{Capability, CapabilitySet};
pub use csrf::CsrfToken;
pub use error::{GateError, InvalidReason};
pub use gate::SecurityGate;
pub use rate_limit::{RateDecision, RateLimiter};
pub use session::{fingerprint, Actor, RequestMeta, SessionContext, SessionRegistry, SessionState, SharedSession};
