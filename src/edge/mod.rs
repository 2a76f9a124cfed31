pub mod error;
pub mod middleware;
pub mod validator;

// Re-export public types and functions
pub use error::{RedeemError, deny_response};
pub use middleware::{RedeemedToken, one_time_token_middleware};
pub use validator::{EdgeValidator, extract_token};
