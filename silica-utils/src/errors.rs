//! Error type for the scheduling backend.
use std::fmt;

/// Convenience wrapper to pass `Error` around.
pub type SilicaResult<T> = Result<T, Error>;

enum ErrorKind {
    /// An internal invariant was violated. These are compiler bugs, never
    /// user errors, and abort the scheduling run.
    Internal(String),
    /// The input graph is malformed in a way the front end should have
    /// prevented.
    Invalid(String),
    /// Miscellaneous error with no additional structure.
    Misc(String),
}

/// Errors generated by the scheduling backend.
pub struct Error {
    kind: Box<ErrorKind>,
}

impl Error {
    /// An unrecoverable internal-consistency failure.
    pub fn internal<S: ToString>(msg: S) -> Self {
        Self {
            kind: Box::new(ErrorKind::Internal(msg.to_string())),
        }
    }

    /// A malformed input graph.
    pub fn invalid<S: ToString>(msg: S) -> Self {
        Self {
            kind: Box::new(ErrorKind::Invalid(msg.to_string())),
        }
    }

    pub fn misc<S: ToString>(msg: S) -> Self {
        Self {
            kind: Box::new(ErrorKind::Misc(msg.to_string())),
        }
    }

    /// True if this error reports an internal invariant violation.
    pub fn is_internal(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Internal(..))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.kind {
            ErrorKind::Internal(msg) => {
                write!(f, "internal compiler error: {msg}")
            }
            ErrorKind::Invalid(msg) => {
                write!(f, "malformed graph: {msg}")
            }
            ErrorKind::Misc(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}
