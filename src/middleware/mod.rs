pub mod auth;
pub mod response;

pub use auth::{jwt_auth_middleware, AuthSession};
pub use response::{ApiResponse, ApiResult};
