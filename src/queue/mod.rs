//! The per-partition durable queue: `DiskQueueWriter` and
//! `DiskQueueReader` over a shared segment store.

pub mod error;
pub mod frame;
pub mod offset;
pub mod reader;
pub mod segment;
pub mod writer;

pub use error::{Error, Result};
pub use offset::{FilePos, Offset, QueueEnd};
pub use reader::{ConfirmTarget, ReadResult, Reader};
pub use writer::Queue;
