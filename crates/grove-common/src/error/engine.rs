//! Engine error types.

use thiserror::Error;

use crate::types::PhysicalPageId;

/// The main error type for GroveDB.
///
/// Every public operation returns one of these; no panics cross the API
/// boundary on valid inputs. Transient internal conditions (a rewrite-region
/// revalidation failure, a page renumbered mid-lookup) are *not* represented
/// here; the component that observes them retries, with backoff where
/// applicable.
#[derive(Debug, Error)]
pub enum GroveError {
    /// The requested key does not exist (or is deleted).
    #[error("key not found")]
    KeyNotFound,

    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Data corruption detected.
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Page checksum mismatch.
    #[error("checksum mismatch for page {page_id}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// The page whose checksum failed.
        page_id: PhysicalPageId,
        /// Expected checksum (from the page header).
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// Page not found in the buffer pool.
    #[error("page {page_id} not resident in buffer pool")]
    PageNotResident {
        /// The missing page.
        page_id: PhysicalPageId,
    },

    /// No free frames available for eviction.
    #[error("no free frames available, all pages are pinned")]
    NoFreeFrames,

    /// The engine is shutting down.
    #[error("engine is shutting down")]
    ShuttingDown,
}

impl GroveError {
    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true if this is a transient error that can be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NoFreeFrames)
    }

    /// Returns true if this error indicates on-disk damage.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corruption { .. } | Self::ChecksumMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(GroveError::KeyNotFound.to_string(), "key not found");

        let err = GroveError::invalid_argument("records must be sorted");
        assert_eq!(
            err.to_string(),
            "invalid argument: records must be sorted"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(GroveError::NoFreeFrames.is_retryable());
        assert!(!GroveError::KeyNotFound.is_retryable());
    }

    #[test]
    fn test_is_corruption() {
        let err = GroveError::ChecksumMismatch {
            page_id: PhysicalPageId::new(1),
            expected: 123,
            actual: 456,
        };
        assert!(err.is_corruption());
        assert!(GroveError::corruption("bad overflow pointer").is_corruption());
        assert!(!GroveError::KeyNotFound.is_corruption());
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: GroveError = io_err.into();
        assert!(matches!(err, GroveError::Io { .. }));
    }
}
