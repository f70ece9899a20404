//! OBD-II Error Types

use thiserror::Error;

/// Errors raised while interpreting adapter responses
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObdError {
    /// Response did not carry the expected positive-response header
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Adapter answered an AT or service command with an error marker
    #[error("Adapter rejected {command}: {response}")]
    CommandRejected { command: String, response: String },
}
