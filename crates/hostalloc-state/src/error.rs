//! Error types for the host inventory store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// Failures raised by [`crate::StateStore`].
///
/// redb and serde errors are flattened to strings so the enum stays `Send`,
/// `Sync` and independent of the storage crate's error hierarchy.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open host store: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("host not found: {0}")]
    HostNotFound(String),

    /// An inventory row exists without its capacity row.
    #[error("host {0} has no capacity record")]
    MissingCapacity(String),
}
