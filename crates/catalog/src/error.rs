//! Catalog error types.

use thiserror::Error;

use crate::ToolRef;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("tool {0} not found")]
    ToolNotFound(ToolRef),

    #[error("duplicate tool registration: {0}")]
    DuplicateTool(ToolRef),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: ToolRef, reason: String },

    #[error("{tool} failed: {message}")]
    InvocationFailed { tool: ToolRef, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
