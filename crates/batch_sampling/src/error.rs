//! Error types for batch sampling
//!
//! Every error here is a setup or usage mistake raised synchronously. None of
//! them is retryable.

use crate::state::SamplerType;
use thiserror::Error;

/// Primary error type for sampler construction, iteration control and
/// checkpoint handling.
#[derive(Debug, Error)]
pub enum SamplerError {
    /// Malformed construction arguments or an unsupported operation
    #[error("Invalid sampler configuration: {reason}")]
    Configuration { reason: String },

    /// A checkpoint record that cannot be applied to this sampler
    #[error("Incompatible sampler state: {reason}")]
    StateIncompatible { reason: String },

    /// `state_dict()` called while the current pass cannot be described
    /// by a compact record
    #[error("Cannot snapshot {sampler} sampler yet: {reason}")]
    PrematureSnapshot { sampler: SamplerType, reason: String },

    /// An operation that requires a pass boundary was issued mid-pass
    #[error("Cannot {operation} while {sampler} sampler is in the middle of a pass ({consumed} samples consumed)")]
    IterationInProgress {
        sampler: SamplerType,
        operation: &'static str,
        consumed: usize,
    },
}

impl SamplerError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        SamplerError::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn incompatible(reason: impl Into<String>) -> Self {
        SamplerError::StateIncompatible {
            reason: reason.into(),
        }
    }

    /// Returns true if the error came from a checkpoint record rather than
    /// from the way the sampler was built or driven.
    pub fn is_state_error(&self) -> bool {
        matches!(self, SamplerError::StateIncompatible { .. })
    }

    /// Returns true if the API was called out of sequence.
    pub fn is_sequencing_error(&self) -> bool {
        matches!(
            self,
            SamplerError::PrematureSnapshot { .. } | SamplerError::IterationInProgress { .. }
        )
    }
}

/// Result type alias for sampler operations
pub type Result<T> = std::result::Result<T, SamplerError>;

/// `anyhow::ensure!` for construction arguments: bails with
/// `SamplerError::Configuration` built from the format arguments.
macro_rules! ensure_config {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::SamplerError::config(format!($($arg)+)));
        }
    };
}
pub(crate) use ensure_config;
