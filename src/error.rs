//! List ranking errors.

use std::error;
use std::fmt;
use std::fmt::Display;
use std::io;

use crate::sort::SortError;

/// List ranking result.
pub type Result<T> = std::result::Result<T, Error>;

/// List ranking error.
#[derive(Debug)]
pub enum Error {
    /// Input edges do not form exactly one simple list.
    MalformedList(String),
    /// Memory budget is too small even for a binary merge.
    InsufficientMemory { budget: u64, required: u64 },
    /// Record stream storage error.
    Storage(io::Error),
    /// Sort chunk serialization or deserialization error.
    Codec(Box<dyn error::Error + Send + Sync>),
    /// Sorting thread pool initialization error.
    ThreadPool(rayon::ThreadPoolBuildError),
    /// Internal invariant broken by wrongly prepared streams.
    LogicInvariant(String),
    /// Ranked output does not reproduce the list order.
    Verification(String),
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self {
            Error::Storage(err) => Some(err),
            Error::Codec(err) => Some(err.as_ref()),
            Error::ThreadPool(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            Error::MalformedList(msg) => write!(f, "malformed list: {}", msg),
            Error::InsufficientMemory { budget, required } => write!(
                f,
                "insufficient memory: budget is {} bytes, at least {} bytes required",
                budget, required
            ),
            Error::Storage(err) => write!(f, "record stream I/O failed: {}", err),
            Error::Codec(err) => write!(f, "sort chunk encoding error: {}", err),
            Error::ThreadPool(err) => write!(f, "thread pool initialization failed: {}", err),
            Error::LogicInvariant(msg) => write!(f, "invariant violated: {}", msg),
            Error::Verification(msg) => write!(f, "ranking verification failed: {}", msg),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Storage(err)
    }
}

impl<S, D> From<SortError<S, D, Error>> for Error
where
    S: error::Error + Send + Sync + 'static,
    D: error::Error + Send + Sync + 'static,
{
    fn from(err: SortError<S, D, Error>) -> Self {
        match err {
            SortError::TempDir(err) => Error::Storage(err),
            SortError::ThreadPoolBuildError(err) => Error::ThreadPool(err),
            SortError::IO(err) => Error::Storage(err),
            SortError::SerializationError(err) => Error::Codec(Box::new(err)),
            SortError::DeserializationError(err) => Error::Codec(Box::new(err)),
            SortError::InputError(err) => err,
            SortError::InsufficientMemory { available, required } => Error::InsufficientMemory {
                budget: available,
                required,
            },
        }
    }
}
