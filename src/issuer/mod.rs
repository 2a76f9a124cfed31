pub mod error;
pub mod manager;
pub mod response;
pub mod token;

// Re-export public types and functions
pub use error::IssueError;
pub use manager::{IssuedUrl, IssuerSettings, MAX_COLLISION_ATTEMPTS, RetryPolicy, TokenIssuer};
pub use response::IssueUrlResponse;
pub use token::{generate_token, is_well_formed_token, token_prefix};
