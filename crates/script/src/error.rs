//! Snippet exceptions.

use thiserror::Error;

/// Exception classes a snippet can raise or observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcKind {
    Exception,
    SyntaxError,
    NameError,
    TypeError,
    ValueError,
    LookupError,
    KeyError,
    IndexError,
    AttributeError,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    ImportError,
    AssertionError,
    RuntimeError,
    ToolNotFoundError,
    ToolInvocationError,
    StateSerializationError,
    CapabilityError,
    ExecutionTimeoutError,
    RecursionError,
    MemoryError,
}

impl ExcKind {
    /// Classes bound as builtins, so snippets can `raise` and `except` them.
    pub const BUILTIN: [ExcKind; 22] = [
        ExcKind::Exception,
        ExcKind::SyntaxError,
        ExcKind::NameError,
        ExcKind::TypeError,
        ExcKind::ValueError,
        ExcKind::LookupError,
        ExcKind::KeyError,
        ExcKind::IndexError,
        ExcKind::AttributeError,
        ExcKind::ArithmeticError,
        ExcKind::ZeroDivisionError,
        ExcKind::OverflowError,
        ExcKind::ImportError,
        ExcKind::AssertionError,
        ExcKind::RuntimeError,
        ExcKind::ToolNotFoundError,
        ExcKind::ToolInvocationError,
        ExcKind::StateSerializationError,
        ExcKind::CapabilityError,
        ExcKind::ExecutionTimeoutError,
        ExcKind::RecursionError,
        ExcKind::MemoryError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExcKind::Exception => "Exception",
            ExcKind::SyntaxError => "SyntaxError",
            ExcKind::NameError => "NameError",
            ExcKind::TypeError => "TypeError",
            ExcKind::ValueError => "ValueError",
            ExcKind::LookupError => "LookupError",
            ExcKind::KeyError => "KeyError",
            ExcKind::IndexError => "IndexError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::ArithmeticError => "ArithmeticError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::ImportError => "ImportError",
            ExcKind::AssertionError => "AssertionError",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::ToolNotFoundError => "ToolNotFoundError",
            ExcKind::ToolInvocationError => "ToolInvocationError",
            ExcKind::StateSerializationError => "StateSerializationError",
            ExcKind::CapabilityError => "CapabilityError",
            ExcKind::ExecutionTimeoutError => "ExecutionTimeoutError",
            ExcKind::RecursionError => "RecursionError",
            ExcKind::MemoryError => "MemoryError",
        }
    }

    fn parent(self) -> Option<ExcKind> {
        match self {
            ExcKind::Exception => None,
            ExcKind::KeyError | ExcKind::IndexError => Some(ExcKind::LookupError),
            ExcKind::ZeroDivisionError | ExcKind::OverflowError => Some(ExcKind::ArithmeticError),
            ExcKind::RecursionError => Some(ExcKind::RuntimeError),
            _ => Some(ExcKind::Exception),
        }
    }

    /// Whether an `except self` clause handles `other`.
    pub fn handles(self, other: ExcKind) -> bool {
        let mut current = Some(other);
        while let Some(kind) = current {
            if kind == self {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    /// Resource-limit aborts run to the top no matter what the snippet does.
    pub fn is_catchable(self) -> bool {
        !matches!(
            self,
            ExcKind::ExecutionTimeoutError | ExcKind::RecursionError | ExcKind::MemoryError
        )
    }
}

impl std::fmt::Display for ExcKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An exception raised while parsing or running a snippet.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}{}", .line.map(|l| format!(" (line {l})")).unwrap_or_default())]
pub struct Exception {
    pub kind: ExcKind,
    pub message: String,
    pub line: Option<u32>,
}

impl Exception {
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn at(mut self, line: u32) -> Self {
        self.line.get_or_insert(line);
        self
    }

    pub fn syntax(line: u32, message: impl Into<String>) -> Self {
        Self::new(ExcKind::SyntaxError, message).at(line)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::ValueError, message)
    }
}

pub type Result<T> = std::result::Result<T, Exception>;
