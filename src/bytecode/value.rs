//! Runtime values and exception objects.
//!
//! Values are deliberately small: the object model of the managed language is
//! out of scope here, the interpreter only needs enough to drive control flow,
//! arithmetic and calls between code units.

use std::fmt;
use std::sync::Arc;

/// A value on the VM stack or in a local slot
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Nil,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// Immutable string
    Str(Arc<str>),
}

impl Value {
    /// Build a string value
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    /// Name of the value's type, used in type errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "Nil",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Str(_) => "Str",
        }
    }

    /// Truthiness used by conditional jumps
    ///
    /// Only `Bool(false)` and `Nil` are false.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false) | Value::Nil)
    }

    /// Get the integer payload if this is an `Int`
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// A raised managed exception
///
/// Exceptions travel as [`ExceptionRef`] so that the exact object injected by
/// one context is the one observed by the context that raises it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    kind: String,
    message: String,
}

/// Shared handle to an exception object
pub type ExceptionRef = Arc<Exception>;

impl Exception {
    /// Create a new exception of the given kind
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create a new exception already wrapped in an [`ExceptionRef`]
    pub fn shared(kind: impl Into<String>, message: impl Into<String>) -> ExceptionRef {
        Arc::new(Self::new(kind, message))
    }

    /// Exception kind, e.g. `RuntimeError` or `KeyboardInterrupt`
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Human readable message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}
