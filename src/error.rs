//! Error types for the primec middle-end

use thiserror::Error;

/// Compilation, serialization and execution errors
///
/// Every variant carries the human-readable diagnostic. The `Display` form is
/// the bare message, so drivers can print it after their own prefix.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Program shape error
    ///
    /// **Triggered by:** missing entry definition, bad entry parameter list,
    /// templated entry, duplicate definitions, import name conflicts
    /// **Example:** `missing entry definition /main`
    #[error("{0}")]
    Structural(String),

    /// Effect capability error
    ///
    /// **Triggered by:** unknown effect names, an operation outside the active
    /// effect set, a nested `effects(...)` that widens its enclosing set
    /// **Example:** `print_line requires io_out effect`
    #[error("{0}")]
    Effect(String),

    /// Operand-kind or binding-type error
    ///
    /// **Triggered by:** bool in arithmetic, mixed signed/unsigned or int/float
    /// operands, non-bool conditions, unsupported type names
    /// **Example:** `arithmetic operators do not support mixed int/float operands`
    #[error("{0}")]
    Type(String),

    /// Call shape error
    ///
    /// **Triggered by:** argument count mismatch, unknown or duplicate named
    /// arguments, block arguments on an ordinary call
    /// **Example:** `unknown named argument: z`
    #[error("{0}")]
    CallShape(String),

    /// Construct the backend cannot represent
    ///
    /// **Triggered by:** recursive inline expansion, string pointers, heap
    /// allocation, block arguments reaching the lowerer
    /// **Example:** `native backend does not support recursive calls: /loop`
    #[error("{0}")]
    Lowering(String),

    /// Binary IR encode/decode error
    #[error("{0}")]
    Serialization(String),

    /// Reference VM execution failure
    #[error("{0}")]
    Execution(String),

    /// Malformed program input (JSON decoding)
    #[error("invalid program input: {0}")]
    InvalidInput(String),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Entry and program shape
    Structural,
    /// Effect capabilities
    Effect,
    /// Operand kinds and types
    Type,
    /// Call arity and argument naming
    CallShape,
    /// Backend capability limits
    Lowering,
    /// Binary IR format
    Serialization,
    /// VM execution
    Execution,
    /// Program decoding
    Input,
}

impl Error {
    /// Create a structural error with a message
    pub fn structural(msg: impl Into<String>) -> Self {
        Error::Structural(msg.into())
    }

    /// Create an effect error with a message
    pub fn effect(msg: impl Into<String>) -> Self {
        Error::Effect(msg.into())
    }

    /// Create a type error with a message
    pub fn type_error(msg: impl Into<String>) -> Self {
        Error::Type(msg.into())
    }

    /// Create a call-shape error with a message
    pub fn call_shape(msg: impl Into<String>) -> Self {
        Error::CallShape(msg.into())
    }

    /// Create a lowering-capability error with a message
    pub fn lowering(msg: impl Into<String>) -> Self {
        Error::Lowering(msg.into())
    }

    /// Create a serialization error with a message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Error::Serialization(msg.into())
    }

    /// Create a VM execution error with a message
    pub fn execution(msg: impl Into<String>) -> Self {
        Error::Execution(msg.into())
    }

    /// Classify the error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Structural(_) => ErrorCategory::Structural,
            Error::Effect(_) => ErrorCategory::Effect,
            Error::Type(_) => ErrorCategory::Type,
            Error::CallShape(_) => ErrorCategory::CallShape,
            Error::Lowering(_) => ErrorCategory::Lowering,
            Error::Serialization(_) => ErrorCategory::Serialization,
            Error::Execution(_) => ErrorCategory::Execution,
            Error::InvalidInput(_) => ErrorCategory::Input,
        }
    }

    /// The diagnostic text without any category prefix
    pub fn message(&self) -> &str {
        match self {
            Error::Structural(msg)
            | Error::Effect(msg)
            | Error::Type(msg)
            | Error::CallShape(msg)
            | Error::Lowering(msg)
            | Error::Serialization(msg)
            | Error::Execution(msg)
            | Error::InvalidInput(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(err.to_string())
    }
}

/// Result type for primec operations
pub type Result<T> = std::result::Result<T, Error>;
