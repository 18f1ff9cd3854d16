//! Error types for the B-Tree engine.

use thiserror::Error;

/// Result type alias for B-Tree operations.
pub type Result<T> = std::result::Result<T, BtreeError>;

#[derive(Debug, Error)]
pub enum BtreeError {
    /// An I/O operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk data failed validation: bad magic, unsound lengths, an
    /// invariant violation.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// A page id past the end of the page file was read.
    #[error("page {0} does not exist")]
    PageMissing(u32),

    /// A page's encoded payload would exceed the page size.
    #[error("page overflow: payload exceeds page size {0}")]
    PageOverflow(usize),

    /// The caller passed an argument the engine cannot act on.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation is not implemented by this engine.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}
