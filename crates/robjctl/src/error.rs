//! Error types for robjctl

use remote_objects::RpcError;
use remote_objects::error::ErrorCategory;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<RpcError> for CliError {
    fn from(err: RpcError) -> Self {
        let message = err.message().to_string();
        match err.category() {
            ErrorCategory::Connection => CliError::ServiceUnavailable(message),
            ErrorCategory::Security => CliError::PermissionDenied(message),
            ErrorCategory::Reference | ErrorCategory::Dispatch => CliError::NotFound(message),
            ErrorCategory::Config => CliError::InvalidConfiguration(message),
            ErrorCategory::Protocol | ErrorCategory::Application => CliError::Remote(err.to_string()),
        }
    }
}
