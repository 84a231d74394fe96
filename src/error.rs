//! Error type shared by the samplers and diagnostics.

use thiserror::Error;

/// Errors raised while configuring samplers, running chains or computing diagnostics.
///
/// A rejected proposal is ordinary sampler behaviour and never surfaces as an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum McmcError {
    /// Non-positive chain or iteration counts, degenerate proposal scales, mismatched
    /// initial states or seeds.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Chains that cannot be fed to a diagnostic (unequal lengths, too short, empty).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A density broke its non-negativity contract, or a statistic is undefined.
    #[error("numerical error: {0}")]
    NumericalError(String),
}

pub type Result<T, E = McmcError> = std::result::Result<T, E>;

impl McmcError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub(crate) fn input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub(crate) fn numerical(msg: impl Into<String>) -> Self {
        Self::NumericalError(msg.into())
    }
}
