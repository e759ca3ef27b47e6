//! Error types for the pools

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Pool is closed")]
    PoolClosed,

    #[error("Pool is empty - no objects available")]
    PoolEmpty,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Factory failed: {0}")]
    Factory(Box<dyn std::error::Error + Send + Sync>),

    #[error("File watch failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl PoolError {
    /// Wrap an arbitrary factory failure
    pub fn factory<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        PoolError::Factory(err.into())
    }

    /// Whether this is an I/O "not found" failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, PoolError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
