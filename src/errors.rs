use std::io;

/// Error type shared by the container, tree, and catalog layers.
///
/// Every error is terminal for the call that raised it; this layer never
/// retries or falls back implicitly.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid container format: {0}")]
    InvalidFormat(String),

    #[error("File was written with endianness {file}, this machine has endianness {host}")]
    EndianMismatch { file: String, host: String },

    #[error("No kd-tree {} found in container", .name.as_deref().unwrap_or("(unnamed)"))]
    TreeNotFound { name: Option<String> },

    #[error("Table {0} not found")]
    MissingTable(String),

    #[error("Keyword {0} not found")]
    MissingKeyword(&'static str),

    #[error("Corrupt kd-tree: {0}")]
    CorruptTree(String),

    #[error("Expected {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Id {id} out of range: count is {count}")]
    OutOfRange { id: usize, count: usize },

    #[error("Quad {quad} references star {star}, but the catalog has {nstars} stars")]
    CorruptQuads { quad: usize, star: u32, nstars: usize },

    #[error("Permutation integrity check failed: {0}")]
    Integrity(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
