//! Runtime interpreter error implementation

use quill_asm::ReadError;
use thiserror::Error;

use crate::value::Value;

/// Interpreter runtime error variants.
#[derive(Debug, Error)]
pub enum InterpreterError {
    /// A script exception propagated out of the outermost frame.
    #[error("uncaught exception: {0}")]
    Uncaught(Value),
    /// An abort was raised; catch handlers were bypassed.
    #[error("execution aborted: {0}")]
    Aborted(Value),
    /// The byte-code stream is malformed. This is a compiler bug, not a
    /// script-observable condition.
    #[error("malformed byte-code: {0}")]
    Bytecode(#[from] ReadError),
}

impl InterpreterError {
    /// The script-level value carried by this error, if any.
    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Uncaught(value) | Self::Aborted(value) => Some(value),
            Self::Bytecode(_) => None,
        }
    }
}

/// Error description raised while executing byte-code: either a thrown value
/// travelling towards a matching catch context, or a condition that must
/// unwind to the outermost entry point.
#[derive(Debug)]
pub enum RuntimeError {
    /// In-flight exception; consumed by a matching `CATCH` or
    /// `FINALLY_THROW` context.
    Throw(Value),
    /// Unmaskable termination raised through the VM-stop callback or the
    /// host; bypasses catch handlers.
    Abort(Value),
    /// Malformed byte-code stream.
    Bytecode(ReadError),
}

impl RuntimeError {
    /// Flag whether a catch context may consume this error.
    pub const fn is_catchable(&self) -> bool {
        matches!(self, Self::Throw(_))
    }

    /// The thrown or abort value, when one exists.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Throw(value) | Self::Abort(value) => Some(value),
            Self::Bytecode(_) => None,
        }
    }
}

impl From<ReadError> for RuntimeError {
    fn from(e: ReadError) -> Self {
        Self::Bytecode(e)
    }
}

impl From<RuntimeError> for InterpreterError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::Throw(value) => Self::Uncaught(value),
            RuntimeError::Abort(value) => Self::Aborted(value),
            RuntimeError::Bytecode(e) => Self::Bytecode(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_thrown_errors_are_catchable() {
        assert!(RuntimeError::Throw(Value::Int(1)).is_catchable());
        assert!(!RuntimeError::Abort(Value::Int(1)).is_catchable());
        assert!(!RuntimeError::Bytecode(ReadError::UnexpectedEnd).is_catchable());
    }

    #[test]
    fn conversion_preserves_the_abort_distinction() {
        let uncaught = InterpreterError::from(RuntimeError::Throw(Value::Null));
        let aborted = InterpreterError::from(RuntimeError::Abort(Value::Null));
        assert!(matches!(uncaught, InterpreterError::Uncaught(_)));
        assert!(matches!(aborted, InterpreterError::Aborted(_)));
    }
}
