use thiserror::Error;

/// Error taxonomy for the backward-data primitive.
///
/// Every failure is detected synchronously and returned to the immediate
/// caller; there is no retry or fallback inside this crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvGradError {
    /// Malformed shapes, unsupported stride/dilation placement, rank
    /// mismatches, or a non-positive computed output size. Always raised
    /// before any numeric work starts.
    #[error("Invalid argument in operation '{operation}': {reason}")]
    InvalidArgument { operation: String, reason: String },

    /// An internal failure during plan construction or execution. The call
    /// produces no output at all; the buffer handed to the engine must be
    /// considered garbage.
    #[error("Operation '{operation}' aborted: {details}")]
    ComputationAborted { operation: String, details: String },
}

impl ConvGradError {
    /// Create an invalid argument error with operation context
    pub fn invalid_argument(operation: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an aborted-computation error with operation context
    pub fn aborted(operation: &str, details: impl Into<String>) -> Self {
        Self::ComputationAborted {
            operation: operation.to_string(),
            details: details.into(),
        }
    }

    /// Name of the operation that raised the error
    pub fn operation(&self) -> &str {
        match self {
            Self::InvalidArgument { operation, .. } => operation,
            Self::ComputationAborted { operation, .. } => operation,
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, ConvGradError>;
