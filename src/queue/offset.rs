//! The offset model: a physical `(FileNum, Pos)` pair plus the canonical
//! monotonic `VirtualOffset`, and the `QueueEnd` token published by the
//! writer and consumed by readers.
//!
//! `interface{}` + type-switch in the source (`end.(*diskQueueEndInfo)`)
//! is a sum type: a `QueueEnd` is either a disk-backed end or (for a
//! colocated in-memory-only queue) a memory end. We model that as an
//! explicit tagged enum with accessors, rather than a trait object.

use std::cmp::Ordering;

/// Physical location of a frame: which segment file, and the byte
/// position within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilePos {
    pub file_num: u64,
    pub pos: u64,
}

impl FilePos {
    pub const ZERO: FilePos = FilePos { file_num: 0, pos: 0 };

    pub fn new(file_num: u64, pos: u64) -> Self {
        Self { file_num, pos }
    }
}

impl PartialOrd for FilePos {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FilePos {
    fn cmp(&self, other: &Self) -> Ordering {
        self.file_num
            .cmp(&other.file_num)
            .then(self.pos.cmp(&other.pos))
    }
}

/// A fully-resolved position in the log: the physical `(FileNum, Pos)`
/// projection plus the canonical virtual byte offset since queue
/// creation. `virtual` is the identifier callers should compare and
/// persist; `file` is recomputed from it by the segment store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offset {
    pub file: FilePos,
    pub virtual_offset: u64,
}

impl Offset {
    pub const ZERO: Offset = Offset {
        file: FilePos::ZERO,
        virtual_offset: 0,
    };

    pub fn new(file: FilePos, virtual_offset: u64) -> Self {
        Self {
            file,
            virtual_offset,
        }
    }
}

/// Snapshot of the log's end, published by the writer after a flush and
/// observed by readers. Immutable once constructed.
///
/// A disk-backed queue publishes a `Disk` end with the total message
/// count; a purely in-memory projection (used in a few tests that don't
/// want to touch the filesystem) publishes a `Mem` end with no message
/// count tracking. Both expose the same `Offset`/`Virtual` accessors so
/// callers never need to match on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEnd {
    Disk { offset: Offset, total_msg_cnt: u64 },
    Mem { offset: Offset },
}

impl QueueEnd {
    pub fn offset(&self) -> Offset {
        match self {
            QueueEnd::Disk { offset, .. } => *offset,
            QueueEnd::Mem { offset } => *offset,
        }
    }

    pub fn file(&self) -> FilePos {
        self.offset().file
    }

    pub fn virtual_offset(&self) -> u64 {
        self.offset().virtual_offset
    }

    pub fn total_msg_cnt(&self) -> Option<u64> {
        match self {
            QueueEnd::Disk { total_msg_cnt, .. } => Some(*total_msg_cnt),
            QueueEnd::Mem { .. } => None,
        }
    }
}
