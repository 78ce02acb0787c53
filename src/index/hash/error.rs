use thiserror::Error;

use crate::storage::buffer::BufferPoolError;
use crate::storage::page::IntegrityViolation;

#[derive(Error, Debug)]
pub enum HashIndexError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Directory integrity violated: {0}")]
    Integrity(#[from] IntegrityViolation),
}
