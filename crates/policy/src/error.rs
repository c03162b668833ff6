//! Policy error types.

use thiserror::Error;

/// Errors from loading or enforcing a sandbox policy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A primitive or tool load was refused.
    #[error("CapabilityError: {0}")]
    Denied(String),

    /// The file is not a valid set of `[allow]`/`[deny]` tables.
    #[error("invalid policy file: {0}")]
    Parse(String),

    #[error("cannot read policy file: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
