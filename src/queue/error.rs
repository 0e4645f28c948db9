use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error on {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt metadata: {0}")]
    CorruptMetadata(&'static str),

    #[error("corrupt frame at virtual offset {offset}: {reason}")]
    CorruptFrame { offset: u64, reason: &'static str },

    #[error("payload size {size} outside bound [{min}, {max}]")]
    PayloadOutOfBounds { size: usize, min: usize, max: usize },

    #[error("rollback target {target} is past the current write end {end}")]
    RollbackPastEnd { target: u64, end: u64 },

    #[error("offset {0} is not present among delivered messages")]
    OffsetNotFound(u64),

    #[error("queue is closed")]
    Closed,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: Some(path.into()),
            source,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io { path: None, source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
