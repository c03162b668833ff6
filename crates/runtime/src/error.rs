use serde::{Deserialize, Serialize};
use thiserror::Error;

use script::ExcKind;

/// Failure categories reported in `ExecutionResult::error_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    SnippetSyntaxError,
    ToolNotFoundError,
    ToolInvocationError,
    StateSerializationError,
    ExecutionTimeoutError,
    SessionBusyError,
    CapabilityError,
    RuntimeError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::SnippetSyntaxError => "SnippetSyntaxError",
            ErrorKind::ToolNotFoundError => "ToolNotFoundError",
            ErrorKind::ToolInvocationError => "ToolInvocationError",
            ErrorKind::StateSerializationError => "StateSerializationError",
            ErrorKind::ExecutionTimeoutError => "ExecutionTimeoutError",
            ErrorKind::SessionBusyError => "SessionBusyError",
            ErrorKind::CapabilityError => "CapabilityError",
            ErrorKind::RuntimeError => "RuntimeError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ExcKind> for ErrorKind {
    fn from(kind: ExcKind) -> Self {
        match kind {
            ExcKind::SyntaxError => ErrorKind::SnippetSyntaxError,
            ExcKind::ToolNotFoundError => ErrorKind::ToolNotFoundError,
            ExcKind::ToolInvocationError => ErrorKind::ToolInvocationError,
            ExcKind::StateSerializationError => ErrorKind::StateSerializationError,
            ExcKind::ExecutionTimeoutError => ErrorKind::ExecutionTimeoutError,
            ExcKind::CapabilityError => ErrorKind::CapabilityError,
            _ => ErrorKind::RuntimeError,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The snippet raised and did not catch.
    #[error("{0}")]
    Snippet(#[from] script::Exception),

    #[error("SnippetSyntaxError: code is {size} bytes, the limit is {limit}")]
    CodeTooLong { size: usize, limit: usize },

    #[error("CapabilityError: snippet uses forbidden call '{0}'")]
    Forbidden(String),

    #[error("SessionBusyError: session '{0}' is already executing")]
    SessionBusy(String),

    #[error("RuntimeError: interpreter crashed: {0}")]
    Crashed(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Policy(#[from] policy::Error),

    #[error(transparent)]
    Catalog(#[from] catalog::Error),
}

impl Error {
    /// Taxonomy tag for an execution failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Snippet(exc) => exc.kind.into(),
            Error::CodeTooLong { .. } => ErrorKind::SnippetSyntaxError,
            Error::SessionBusy(_) => ErrorKind::SessionBusyError,
            Error::Forbidden(_) => ErrorKind::CapabilityError,
            Error::Policy(policy::Error::Denied(_)) => ErrorKind::CapabilityError,
            Error::Catalog(catalog::Error::ToolNotFound(_)) => ErrorKind::ToolNotFoundError,
            Error::Catalog(_) => ErrorKind::ToolInvocationError,
            _ => ErrorKind::RuntimeError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceptions_map_onto_the_taxonomy() {
        assert_eq!(ErrorKind::from(ExcKind::SyntaxError), ErrorKind::SnippetSyntaxError);
        assert_eq!(ErrorKind::from(ExcKind::NameError), ErrorKind::RuntimeError);
        assert_eq!(ErrorKind::from(ExcKind::RecursionError), ErrorKind::RuntimeError);
        assert_eq!(
            ErrorKind::from(ExcKind::ExecutionTimeoutError),
            ErrorKind::ExecutionTimeoutError
        );
    }

    #[test]
    fn messages_lead_with_the_kind() {
        let err = Error::SessionBusy("s1".into());
        assert_eq!(err.kind(), ErrorKind::SessionBusyError);
        assert!(err.to_string().starts_with("SessionBusyError: "));

        let err = Error::from(script::Exception::new(ExcKind::KeyError, "'x'").at(2));
        assert_eq!(err.to_string(), "KeyError: 'x' (line 2)");
        assert_eq!(err.kind(), ErrorKind::RuntimeError);
    }

    #[test]
    fn serializes_as_plain_tag() {
        let json = serde_json::to_value(ErrorKind::ToolNotFoundError).unwrap();
        assert_eq!(json, "ToolNotFoundError");
    }
}
