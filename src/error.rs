use thiserror::Error;

/// Errors for the bandwidth estimator.
///
/// Feedback processing never fails. Degenerate input just doesn't produce an estimate.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum BweError {
    /// The [`BweConfig`][crate::BweConfig] is not usable.
    #[error("invalid config: {0}")]
    Config(String),
}
