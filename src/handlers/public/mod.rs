// Public handlers: no authentication, no session
pub mod health;

pub use health::health_get;
