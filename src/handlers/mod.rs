// Public (no auth) → Protected (JWT session, security gate, capability check)
pub mod protected;
pub mod public;
