//! Error types for pool root management and reclaim sweeps.

use thiserror::Error;

use crate::pool::PoolOffset;

/// Errors raised at the pool boundary.
///
/// Header reads never fail; every variant here originates in the pool
/// (allocation, free, transaction) or in the callback binding layer.
///
/// # Examples
///
/// ```
/// use pmroot::error::{PoolError, PoolResult};
///
/// let missing = PoolError::RootNotFound;
/// let failed = PoolError::ReclaimFailed { offset: 0x40, reason: "injected".into() };
///
/// assert_eq!(missing.to_string(), "Root object not found");
/// assert_eq!(failed.to_string(), "Failed to reclaim object at offset 0x40: injected");
///
/// let result: PoolResult<u64> = Err(missing);
/// assert!(result.is_err());
/// ```
#[derive(Error, Debug)]
pub enum PoolError {
    /// The root was queried before it was created
    #[error("Root object not found")]
    RootNotFound,
    /// A root descriptor is already installed at the anchor
    #[error("Root object already exists at offset {0:#x}")]
    RootAlreadyExists(PoolOffset),
    /// Roots must be backed by at least one byte
    #[error("Root size must be non-zero")]
    InvalidRootSize,
    /// The pool could not satisfy an allocation
    #[error("Allocation of {requested} bytes failed: {reason}")]
    AllocationFailed { requested: u64, reason: String },
    /// A single object could not be freed during a sweep
    #[error("Failed to reclaim object at offset {offset:#x}: {reason}")]
    ReclaimFailed { offset: PoolOffset, reason: String },
    /// The survivor callback could not be bound
    #[error("Failed to resolve callback binding `{0}`")]
    BindingResolutionFailed(String),
    /// No live allocation starts at the given offset
    #[error("No live object at offset {0:#x}")]
    ObjectNotFound(PoolOffset),
    /// Incrementing a reference count would overflow
    #[error("Reference count overflow at offset {0:#x}")]
    RefCountOverflow(PoolOffset),
    /// A transaction was rolled back
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),
    /// The backing region is not a valid pool image
    #[error("Invalid pool: {0}")]
    InvalidPool(String),
    /// A sweep ran to completion but some objects could not be reclaimed
    #[error("Sweep left {} object(s) unreclaimed", failures.len())]
    SweepIncomplete { failures: Vec<PoolError> },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PoolError {
    /// Offset of the object this error refers to, if any.
    pub fn offset(&self) -> Option<PoolOffset> {
        match self {
            PoolError::RootAlreadyExists(offset)
            | PoolError::ObjectNotFound(offset)
            | PoolError::RefCountOverflow(offset)
            | PoolError::ReclaimFailed { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// Whether retrying the same operation later can succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            PoolError::BindingResolutionFailed(_) | PoolError::InvalidPool(_)
        )
    }
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_readable_messages() {
        let cases = [
            (PoolError::RootNotFound, "Root object not found"),
            (
                PoolError::RootAlreadyExists(0x80),
                "Root object already exists at offset 0x80",
            ),
            (PoolError::InvalidRootSize, "Root size must be non-zero"),
            (
                PoolError::AllocationFailed {
                    requested: 4096,
                    reason: "pool exhausted".into(),
                },
                "Allocation of 4096 bytes failed: pool exhausted",
            ),
            (
                PoolError::BindingResolutionFailed("addToAddrs".into()),
                "Failed to resolve callback binding `addToAddrs`",
            ),
            (PoolError::ObjectNotFound(0x50), "No live object at offset 0x50"),
            (
                PoolError::SweepIncomplete {
                    failures: vec![PoolError::RootNotFound, PoolError::RootNotFound],
                },
                "Sweep left 2 object(s) unreclaimed",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn offset_is_exposed_for_object_errors() {
        let err = PoolError::ReclaimFailed {
            offset: 0x90,
            reason: "x".into(),
        };
        assert_eq!(err.offset(), Some(0x90));
        assert_eq!(PoolError::RootNotFound.offset(), None);
    }

    #[test]
    fn binding_failures_are_not_recoverable() {
        assert!(!PoolError::BindingResolutionFailed("cb".into()).is_recoverable());
        assert!(PoolError::AllocationFailed {
            requested: 1,
            reason: "full".into()
        }
        .is_recoverable());
    }

    #[test]
    fn pool_result_alias_behaves_like_result() {
        fn take_result(value: PoolResult<u64>) -> u64 {
            value.unwrap_or_default()
        }

        assert_eq!(take_result(Ok(42)), 42);
        assert_eq!(take_result(Err(PoolError::RootNotFound)), 0);
    }
}
