use thiserror::Error;

use crate::model::MemoryLocation;

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Trying to free a released buffer: {0}")]
    ReleasedBufferFreed(String),

    #[error("Cyclic buffer alias: {0}")]
    CyclicAlias(String),

    #[error("Buffer view out of range of its parent: {0}")]
    ParentOutOfRange(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedFeature(String),

    #[error("Allocator for {location:?} memory exhausted: {required} bytes required, capacity is {capacity}")]
    AllocatorExhausted {
        location: MemoryLocation,
        required: usize,
        capacity: usize,
    },
}
