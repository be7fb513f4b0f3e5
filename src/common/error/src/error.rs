//! Core error types for anser.

use thiserror::Error;

/// Result type alias using `AnserError`.
pub type AnserResult<T> = std::result::Result<T, AnserError>;

/// Generic boxed error for external error sources.
pub type GenericError = Box<dyn std::error::Error + Send + Sync>;

/// Core error type for anser operations.
///
/// Soft per-entity failures (unresolved refs, unclosable rings) are *not*
/// errors; they are counted by the pipeline and reported in the run summary.
/// Every variant here aborts the conversion.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AnserError {
    /// Malformed input: broken PBF framing, non-polygonal or zero-area
    /// geometry filter, unparsable filter document.
    #[error("InvalidInput: {0}")]
    InvalidInput(String),

    /// A tag filter claims the same concrete key both positively and
    /// negatively after wildcard expansion.
    #[error("FilterConflict: {0}")]
    FilterConflict(String),

    /// The group scheduler reached its row floor and still cannot fit a
    /// batch in memory.
    #[error("OutOfMemory: {0}")]
    OutOfMemory(String),

    /// The working directory is locked by another process.
    #[error("CacheBusy: {0}")]
    CacheBusy(String),

    /// Extract auto-discovery could not cover the filter geometry.
    #[error("UncoveredGeometry: {0}")]
    UncoveredGeometry(String),

    /// A text query matched more than one catalog entry.
    #[error("ExtractAmbiguous: query {query:?} matched multiple extracts: {matches:?}")]
    ExtractAmbiguous {
        /// The query as provided by the caller.
        query: String,
        /// Full names of every matching extract.
        matches: Vec<String>,
    },

    /// A text query matched no catalog entry.
    #[error("ExtractNotFound: query {query:?} matched no extracts (close names: {suggestions:?})")]
    ExtractNotFound {
        /// The query as provided by the caller.
        query: String,
        /// Close catalog names, if any.
        suggestions: Vec<String>,
    },

    /// Engine-level I/O or compute failure not classified above.
    #[error("RuntimeFailure: {0}")]
    RuntimeFailure(String),

    /// Cooperative cancellation observed.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// IO error.
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),

    /// Arrow error.
    #[error("ArrowError: {0}")]
    ArrowError(#[from] arrow_schema::ArrowError),

    /// Parquet error.
    #[error("ParquetError: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    /// JSON serialization error.
    #[error("SerdeJsonError: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// External error from third-party libraries.
    #[error("ExternalError: {0}")]
    ExternalError(GenericError),
}

impl AnserError {
    /// Create a new `InvalidInput` error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new `FilterConflict` error.
    pub fn filter_conflict<S: Into<String>>(msg: S) -> Self {
        Self::FilterConflict(msg.into())
    }

    /// Create a new `OutOfMemory` error.
    pub fn out_of_memory<S: Into<String>>(msg: S) -> Self {
        Self::OutOfMemory(msg.into())
    }

    /// Create a new `CacheBusy` error.
    pub fn cache_busy<S: Into<String>>(msg: S) -> Self {
        Self::CacheBusy(msg.into())
    }

    /// Create a new `UncoveredGeometry` error.
    pub fn uncovered_geometry<S: Into<String>>(msg: S) -> Self {
        Self::UncoveredGeometry(msg.into())
    }

    /// Create a new `RuntimeFailure` error.
    pub fn runtime<S: Into<String>>(msg: S) -> Self {
        Self::RuntimeFailure(msg.into())
    }

    /// Create a new `Cancelled` error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create an error from an external library failure.
    pub fn external<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Self::ExternalError(Box::new(err))
    }

    /// Whether this error signals cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Ensure a condition holds, returning an `InvalidInput` error if not.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $msg:expr) => {
        if !$cond {
            return Err($crate::AnserError::InvalidInput($msg.to_string()));
        }
    };
    ($cond:expr, $variant:ident: $($msg:tt)*) => {
        if !$cond {
            return Err($crate::AnserError::$variant(format!($($msg)*)));
        }
    };
}

/// Return early with an `InvalidInput` error.
#[macro_export]
macro_rules! invalid_input_err {
    ($($arg:tt)*) => {
        return Err($crate::AnserError::InvalidInput(format!($($arg)*)))
    };
}
