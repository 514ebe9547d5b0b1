//! Error type shared by all runtime components.

use std::fmt::{Debug, Display, Formatter};

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for runtime operations.
///
/// An error is always classified by an [`ErrorKind`] and may carry an
/// arbitrary payload describing the concrete failure.
pub struct Error {
    repr: ErrorRepr,
}

impl Error {
    /// Creates a new error from a known kind of error and an arbitrary payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use strand_tasks_int::error::{Error, ErrorKind};
    ///
    /// // errors can be created from strings
    /// let custom_error = Error::new(ErrorKind::Internal, "oh no!");
    /// assert_eq!(custom_error.kind(), ErrorKind::Internal);
    /// ```
    pub fn new(kind: ErrorKind, error: impl Into<BoxedError>) -> Error {
        Error {
            repr: ErrorRepr::Custom(Box::new(CustomError {
                kind,
                error: error.into(),
            })),
        }
    }

    /// Returns the corresponding [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Simple(kind) => kind,
            ErrorRepr::Custom(ref c) => c.kind,
        }
    }

    /// Consumes the `Error`, returning its inner error (if any).
    ///
    /// Returns [`None`] if the error was constructed from a bare
    /// [`ErrorKind`].
    pub fn into_inner(self) -> Option<BoxedError> {
        match self.repr {
            ErrorRepr::Simple(_) => None,
            ErrorRepr::Custom(c) => Some(c.error),
        }
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self {
            repr: ErrorRepr::Simple(kind),
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.repr, f)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.repr {
            ErrorRepr::Simple(kind) => write!(f, "{}", kind.as_str()),
            ErrorRepr::Custom(ref c) => write!(f, "{}: {}", c.kind.as_str(), c.error),
        }
    }
}

impl std::error::Error for Error {}

/// Classification of runtime errors.
///
/// The status a component reports when an operation can not complete; `0`
/// ("success") has no representation here, successful operations return
/// `Ok`.
#[repr(i8)]
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// The operation was cancelled.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// Caller specified an invalid argument.
    InvalidArgument = 3,
    /// Some requested entity was not found.
    NotFound = 4,
    /// The entity that a caller attempted to create already exists.
    AlreadyExists = 5,
    /// Some resource has been exhausted.
    ResourceExhausted = 6,
    /// The system is not in a state required for the operation's execution.
    FailedPrecondition = 7,
    /// The operation was aborted.
    Aborted = 8,
    /// The operation was attempted past the valid range.
    OutOfRange = 9,
    /// The operation is not implemented or is not supported.
    Unimplemented = 10,
    /// Internal error.
    Internal = 11,
    /// The service is currently unavailable.
    Unavailable = 12,
    /// The message bus is shutting down; the submission was rejected.
    ///
    /// Benign when observed from a worker loop or a teardown path.
    ShuttingDown = 13,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown error",
            ErrorKind::InvalidArgument => "invalid argument specified",
            ErrorKind::NotFound => "entity not found",
            ErrorKind::AlreadyExists => "entity already exists",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::FailedPrecondition => "precondition failed",
            ErrorKind::Aborted => "aborted",
            ErrorKind::OutOfRange => "out of range",
            ErrorKind::Unimplemented => "unimplemented",
            ErrorKind::Internal => "internal error",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::ShuttingDown => "shutting down",
        }
    }
}

enum ErrorRepr {
    Simple(ErrorKind),
    Custom(Box<CustomError>),
}

impl Debug for ErrorRepr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorRepr::Simple(kind) => f.debug_tuple("Kind").field(&kind).finish(),
            ErrorRepr::Custom(c) => Debug::fmt(&c, f),
        }
    }
}

#[derive(Debug)]
struct CustomError {
    kind: ErrorKind,
    error: BoxedError,
}
