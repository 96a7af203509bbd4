use thiserror::Error;

use crate::comm::Tag;

#[derive(Error, Debug)]
pub enum MatvecError {
    #[error("Invalid rank: {0}")]
    InvalidRank(i32),
    #[error("Communication error: {0}")]
    CommunicationError(String),
    #[error("Unexpected message from rank {source_rank}: expected {expected}, found {found}")]
    UnexpectedTag {
        source_rank: i32,
        expected: Tag,
        found: Tag,
    },
    #[error("Initialization error: {0}")]
    InitError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Shared memory error: {0}")]
    SharedMemoryError(String),
    #[error("Process error: {0}")]
    ProcessError(String),
    #[error(
        "attempting to {op} a value out of the matrix bound (coords ({row}, {col}) but the matrix is {height}x{width})"
    )]
    OutOfBounds {
        op: &'static str,
        row: usize,
        col: usize,
        height: usize,
        width: usize,
    },
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, MatvecError>;
