use crate::entry::StoreError;
use axum::http::StatusCode;
use thiserror::Error;

/// Reasons an issuance request returns no URL
#[derive(Debug, Error)]
pub enum IssueError {
    #[error("Entry store unavailable after {attempts} attempts: {source}")]
    StorageUnavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("Entry store could not be resolved: {0}")]
    ConfigUnavailable(#[source] StoreError),

    #[error("Token collided {0} times in a row")]
    TokenCollision(u32),
}

impl IssueError {
    pub fn to_err_code(&self) -> StatusCode {
        match self {
            IssueError::StorageUnavailable { .. } | IssueError::ConfigUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            IssueError::TokenCollision(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
