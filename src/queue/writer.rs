//! `DiskQueueWriter`: the append-only segmented log for one partition.
//!
//! All mutating operations are taken through `&mut self` behind the
//! single `Mutex` the owner (`Queue`) holds, matching the "serialized by
//! a single writer lock" contract; there is deliberately no interior
//! locking here; see [`Queue`].

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use log::{debug, info, warn};

use super::error::{Error, Result};
use super::frame::{self, LENGTH_PREFIX_SIZE};
use super::offset::{FilePos, Offset, QueueEnd};
use super::segment::{self, QueueMetadata};
use crate::config::QueueConfig;

/// A boundary: segment `file_num` begins at virtual offset `virtual_start`.
#[derive(Debug, Clone, Copy)]
struct Boundary {
    file_num: u64,
    virtual_start: u64,
}

struct WriterState {
    file: Option<BufWriter<File>>,
    write_file_num: u64,
    write_pos: u64,
    virtual_end: u64,
    total_msg_cnt: u64,
    /// Last flushed (durable) end, returned by `queue_read_end`.
    flushed_end: Offset,
    flushed_total: u64,
    puts_since_flush: u64,
    /// Ascending boundaries for every segment file created so far,
    /// used to resolve rollback/reset targets without re-reading frames.
    boundaries: Vec<Boundary>,
}

/// The durable, append-only log backing one partition. Owns the segment
/// store for `name` under `dir`.
pub struct Queue {
    name: String,
    dir: PathBuf,
    config: QueueConfig,
    state: Mutex<WriterState>,
}

impl Queue {
    /// Opens (recovering from checkpoint, or scanning if none/corrupt)
    /// or creates a fresh queue named `name` under `dir`.
    pub fn open(name: impl Into<String>, dir: impl Into<PathBuf>, config: QueueConfig) -> Result<Self> {
        let name = name.into();
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

        let state = recover(&dir, &name, &config)?;
        Ok(Self {
            name,
            dir,
            config,
            state: Mutex::new(state),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends `payload` as a new frame. Does not fsync; see `flush`.
    pub fn put(&self, payload: &[u8]) -> Result<(Offset, u32, QueueEnd)> {
        frame::validate_len(payload.len(), self.config.min_msg_size, self.config.max_msg_size)?;
        let framed = frame::encode(payload, self.config.min_msg_size, self.config.max_msg_size)?;
        let frame_len = framed.len() as u64;

        let mut state = self.state.lock().expect("writer lock poisoned");

        if state.write_pos > 0 && state.write_pos + frame_len > self.config.max_bytes_per_file {
            roll(&self.dir, &self.name, &mut state)?;
        }

        ensure_open(&self.dir, &self.name, &mut state)?;
        let offset = Offset::new(FilePos::new(state.write_file_num, state.write_pos), state.virtual_end);

        let file = state.file.as_mut().expect("file opened above");
        file.write_all(&framed).map_err(|e| {
            Error::io(segment::segment_path(&self.dir, &self.name, state.write_file_num), e)
        })?;

        state.write_pos += frame_len;
        state.virtual_end += frame_len;
        state.total_msg_cnt += 1;
        state.puts_since_flush += 1;

        let write_end = QueueEnd::Disk {
            offset: Offset::new(FilePos::new(state.write_file_num, state.write_pos), state.virtual_end),
            total_msg_cnt: state.total_msg_cnt,
        };

        let should_flush = self.config.sync_every > 0 && state.puts_since_flush >= self.config.sync_every;
        if should_flush {
            flush_locked(&self.dir, &self.name, &mut state)?;
        }

        Ok((offset, frame_len as u32, write_end))
    }

    /// Fsyncs the current file and atomically checkpoints metadata.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().expect("writer lock poisoned");
        flush_locked(&self.dir, &self.name, &mut state)
    }

    /// The latest durable (flushed) end.
    pub fn queue_read_end(&self) -> QueueEnd {
        let state = self.state.lock().expect("writer lock poisoned");
        QueueEnd::Disk {
            offset: state.flushed_end,
            total_msg_cnt: state.flushed_total,
        }
    }

    /// The latest end, including writes not yet flushed to disk.
    pub fn queue_write_end(&self) -> QueueEnd {
        let state = self.state.lock().expect("writer lock poisoned");
        QueueEnd::Disk {
            offset: Offset::new(FilePos::new(state.write_file_num, state.write_pos), state.virtual_end),
            total_msg_cnt: state.total_msg_cnt,
        }
    }

    /// Truncates the log so it logically ends at `virtual_offset`,
    /// undoing the last `msg_count_decrement` `Put`s.
    pub fn rollback_write(&self, virtual_offset: u64, msg_count_decrement: u64) -> Result<()> {
        let mut state = self.state.lock().expect("writer lock poisoned");
        if virtual_offset > state.virtual_end {
            return Err(Error::RollbackPastEnd {
                target: virtual_offset,
                end: state.virtual_end,
            });
        }
        truncate_to(&self.dir, &self.name, &mut state, virtual_offset)?;
        state.total_msg_cnt = state.total_msg_cnt.saturating_sub(msg_count_decrement);
        flush_locked(&self.dir, &self.name, &mut state)
    }

    /// Forces the writer to an absolute `(virtual_offset, total_msg_cnt)`.
    /// `virtual_offset == 0` deletes every segment file and returns the
    /// queue to its initial state.
    pub fn reset_write_end(&self, virtual_offset: u64, total_msg_cnt: u64) -> Result<()> {
        let mut state = self.state.lock().expect("writer lock poisoned");
        if virtual_offset == 0 {
            state.file = None;
            segment::remove_all(&self.dir, &self.name)?;
            state.write_file_num = 0;
            state.write_pos = 0;
            state.virtual_end = 0;
            state.total_msg_cnt = 0;
            state.boundaries = vec![Boundary {
                file_num: 0,
                virtual_start: 0,
            }];
            return flush_locked(&self.dir, &self.name, &mut state);
        }
        if virtual_offset > state.virtual_end {
            return Err(Error::RollbackPastEnd {
                target: virtual_offset,
                end: state.virtual_end,
            });
        }
        truncate_to(&self.dir, &self.name, &mut state, virtual_offset)?;
        state.total_msg_cnt = total_msg_cnt;
        flush_locked(&self.dir, &self.name, &mut state)
    }

    /// Deletes every segment file strictly below the current write file;
    /// an administrative bulk-drop, distinct from reader-driven reaping.
    pub fn empty(&self) -> Result<()> {
        let mut state = self.state.lock().expect("writer lock poisoned");
        segment::reap(&self.dir, &self.name, state.write_file_num)?;
        state.boundaries.retain(|b| b.file_num >= state.write_file_num);
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.flush()
    }
}

fn ensure_open(dir: &std::path::Path, name: &str, state: &mut WriterState) -> Result<()> {
    if state.file.is_some() {
        return Ok(());
    }
    let path = segment::segment_path(dir, name, state.write_file_num);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| Error::io(&path, e))?;
    state.file = Some(BufWriter::new(file));
    Ok(())
}

fn roll(dir: &std::path::Path, name: &str, state: &mut WriterState) -> Result<()> {
    flush_current_file(dir, name, state)?;
    state.file = None;
    state.write_file_num += 1;
    state.write_pos = 0;
    state.boundaries.push(Boundary {
        file_num: state.write_file_num,
        virtual_start: state.virtual_end,
    });
    debug!("{name}: rolled to segment {}", state.write_file_num);
    Ok(())
}

fn flush_current_file(dir: &std::path::Path, name: &str, state: &mut WriterState) -> Result<()> {
    if let Some(file) = state.file.as_mut() {
        file.flush()
            .map_err(|e| Error::io(segment::segment_path(dir, name, state.write_file_num), e))?;
        file.get_ref()
            .sync_all()
            .map_err(|e| Error::io(segment::segment_path(dir, name, state.write_file_num), e))?;
    }
    Ok(())
}

fn flush_locked(dir: &std::path::Path, name: &str, state: &mut WriterState) -> Result<()> {
    flush_current_file(dir, name, state)?;
    state.flushed_end = Offset::new(FilePos::new(state.write_file_num, state.write_pos), state.virtual_end);
    state.flushed_total = state.total_msg_cnt;
    state.puts_since_flush = 0;

    let meta = QueueMetadata {
        total_msg_cnt: state.total_msg_cnt,
        write: state.flushed_end,
        read: Offset::ZERO,
        confirmed: Offset::ZERO,
    };
    segment::store_metadata(dir, name, &meta)
}

/// Resolves `virtual_offset` to a physical position using the boundary
/// table, then truncates the owning file (and deletes any later files).
fn truncate_to(
    dir: &std::path::Path,
    name: &str,
    state: &mut WriterState,
    virtual_offset: u64,
) -> Result<()> {
    let boundary = state
        .boundaries
        .iter()
        .rev()
        .find(|b| b.virtual_start <= virtual_offset)
        .copied()
        .expect("boundary table always has an entry at virtual_start 0");
    let target_pos = virtual_offset - boundary.virtual_start;

    state.file = None;
    for file_num in (boundary.file_num + 1)..=state.write_file_num {
        let path = segment::segment_path(dir, name, file_num);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::io(path, err)),
        }
    }
    state.boundaries.retain(|b| b.file_num <= boundary.file_num);

    let path = segment::segment_path(dir, name, boundary.file_num);
    let file = OpenOptions::new()
        .write(true)
        .open(&path)
        .map_err(|e| Error::io(&path, e))?;
    file.set_len(target_pos).map_err(|e| Error::io(&path, e))?;
    drop(file);

    state.write_file_num = boundary.file_num;
    state.write_pos = target_pos;
    state.virtual_end = virtual_offset;
    Ok(())
}

/// Loads the checkpoint if present and valid; otherwise scans forward
/// from segment 0, counting well-formed frames and stopping at the
/// first corrupt or truncated one (best effort, as spec'd).
fn recover(dir: &std::path::Path, name: &str, config: &QueueConfig) -> Result<WriterState> {
    match segment::load_metadata(dir, name) {
        Ok(Some(meta)) => {
            info!("{name}: recovered checkpoint at virtual offset {}", meta.write.virtual_offset);
            return Ok(state_from_metadata(dir, name, meta)?);
        }
        Ok(None) => {}
        Err(err) => {
            warn!("{name}: checkpoint unreadable ({err}), falling back to scan recovery");
        }
    }
    scan_recover(dir, name, config)
}

fn state_from_metadata(dir: &std::path::Path, name: &str, meta: QueueMetadata) -> Result<WriterState> {
    let boundaries = rebuild_boundaries(dir, name, meta.write.file.file_num)?;
    Ok(WriterState {
        file: None,
        write_file_num: meta.write.file.file_num,
        write_pos: meta.write.file.pos,
        virtual_end: meta.write.virtual_offset,
        total_msg_cnt: meta.total_msg_cnt,
        flushed_end: meta.write,
        flushed_total: meta.total_msg_cnt,
        puts_since_flush: 0,
        boundaries,
    })
}

/// Rebuilds the boundary table from segment file sizes on disk (a stat
/// per file, not a content scan) so rollback/reset can resolve virtual
/// offsets after a restart.
fn rebuild_boundaries(dir: &std::path::Path, name: &str, up_to_file_num: u64) -> Result<Vec<Boundary>> {
    let mut boundaries = vec![Boundary {
        file_num: 0,
        virtual_start: 0,
    }];
    let mut virtual_start = 0u64;
    for file_num in 0..up_to_file_num {
        let path = segment::segment_path(dir, name, file_num);
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        virtual_start += size;
        boundaries.push(Boundary {
            file_num: file_num + 1,
            virtual_start,
        });
    }
    Ok(boundaries)
}

fn scan_recover(dir: &std::path::Path, name: &str, config: &QueueConfig) -> Result<WriterState> {
    let files = segment::discover_segments(dir, name)?;
    if files.is_empty() {
        return Ok(WriterState {
            file: None,
            write_file_num: 0,
            write_pos: 0,
            virtual_end: 0,
            total_msg_cnt: 0,
            flushed_end: Offset::ZERO,
            flushed_total: 0,
            puts_since_flush: 0,
            boundaries: vec![Boundary {
                file_num: 0,
                virtual_start: 0,
            }],
        });
    }

    let mut boundaries = vec![Boundary {
        file_num: 0,
        virtual_start: 0,
    }];
    let mut virtual_end = 0u64;
    let mut total_msg_cnt = 0u64;
    let mut write_file_num = 0u64;
    let mut write_pos = 0u64;

    for &file_num in &files {
        let path = segment::segment_path(dir, name, file_num);
        let bytes = std::fs::read(&path).map_err(|e| Error::io(&path, e))?;
        let mut pos = 0usize;
        loop {
            let Some(len) = frame::decode_length_prefix(&bytes[pos..]) else {
                break;
            };
            let len = len as usize;
            if len < config.min_msg_size || len > config.max_msg_size {
                warn!("{name}: corrupt frame length in segment {file_num} at {pos}, stopping scan");
                break;
            }
            let frame_end = pos + LENGTH_PREFIX_SIZE + len;
            if frame_end > bytes.len() {
                warn!("{name}: truncated frame in segment {file_num} at {pos}, stopping scan");
                break;
            }
            pos = frame_end;
            total_msg_cnt += 1;
        }
        virtual_end += pos as u64;
        write_file_num = file_num;
        write_pos = pos as u64;
        boundaries.push(Boundary {
            file_num: file_num + 1,
            virtual_start: virtual_end,
        });
        if pos < bytes.len() {
            // This file had a corrupt tail; it's now the current (and
            // final) write file, truncated to its last good frame.
            break;
        }
    }
    boundaries.retain(|b| b.file_num <= write_file_num);

    let state = WriterState {
        file: None,
        write_file_num,
        write_pos,
        virtual_end,
        total_msg_cnt,
        flushed_end: Offset::new(FilePos::new(write_file_num, write_pos), virtual_end),
        flushed_total: total_msg_cnt,
        puts_since_flush: 0,
        boundaries,
    };
    // Persist what we just reconstructed so the next restart can trust
    // the checkpoint again.
    segment::store_metadata(
        dir,
        name,
        &QueueMetadata {
            total_msg_cnt: state.total_msg_cnt,
            write: state.flushed_end,
            read: Offset::ZERO,
            confirmed: Offset::ZERO,
        },
    )?;
    Ok(state)
}

/// Seeks `file` to `pos` for the reader's use; kept here since it shares
/// the segment naming scheme the reader also depends on.
pub(crate) fn open_segment_for_read(
    dir: &std::path::Path,
    name: &str,
    file_num: u64,
    pos: u64,
) -> Result<File> {
    let path = segment::segment_path(dir, name, file_num);
    let mut file = File::open(&path).map_err(|e| Error::io(&path, e))?;
    file.seek(SeekFrom::Start(pos)).map_err(|e| Error::io(&path, e))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cfg(max_bytes_per_file: u64) -> QueueConfig {
        QueueConfig {
            min_msg_size: 1,
            max_msg_size: 1 << 20,
            max_bytes_per_file,
            sync_every: 0,
        }
    }

    #[test]
    fn s1_write_read_ack_end_token() {
        let dir = tempdir().unwrap();
        let q = Queue::open("t_0", dir.path(), cfg(1024)).unwrap();
        let (offset, frame_len, _) = q.put(b"test").unwrap();
        assert_eq!(offset, Offset::ZERO);
        assert_eq!(frame_len, 8);
        q.flush().unwrap();
        let end = q.queue_write_end();
        assert_eq!(end.file(), FilePos::new(0, 8));
        assert_eq!(end.virtual_offset(), 8);
        assert_eq!(end.total_msg_cnt(), Some(1));
    }

    #[test]
    fn s2_roll_over_arithmetic() {
        let dir = tempdir().unwrap();
        let msg = vec![0u8; 10];
        let ml = msg.len() as u64;
        let q = Queue::open("t_roll", dir.path(), cfg(9 * (ml + 4))).unwrap();
        for _ in 0..10 {
            q.put(&msg).unwrap();
        }
        q.flush().unwrap();
        let end = q.queue_write_end();
        assert_eq!(end.file().file_num, 1);
        assert_eq!(end.file().pos, ml + 4);
        assert_eq!(end.virtual_offset(), 10 * (ml + 4));
    }

    #[test]
    fn s4_rollback_and_reset() {
        let dir = tempdir().unwrap();
        let q = Queue::open("t_s4", dir.path(), cfg(1 << 20)).unwrap();
        let msg = vec![0u8; 4];
        for _ in 0..1000 {
            q.put(&msg).unwrap();
        }
        q.flush().unwrap();
        let frame_len = 8u64;
        let end = q.queue_write_end();
        assert_eq!(end.virtual_offset(), 1000 * frame_len);

        q.rollback_write(end.virtual_offset() - frame_len, 1).unwrap();
        let end = q.queue_write_end();
        assert_eq!(end.total_msg_cnt(), Some(999));
        assert_eq!(end.virtual_offset(), 999 * frame_len);

        q.reset_write_end(4000, 500).unwrap();
        let end = q.queue_write_end();
        assert_eq!(end.virtual_offset(), 4000);
        assert_eq!(end.total_msg_cnt(), Some(500));

        q.reset_write_end(0, 0).unwrap();
        let fresh = Queue::open("t_s4_fresh", dir.path(), cfg(1 << 20)).unwrap();
        assert_eq!(q.queue_write_end().virtual_offset(), fresh.queue_write_end().virtual_offset());
        assert_eq!(q.queue_write_end().total_msg_cnt(), fresh.queue_write_end().total_msg_cnt());
    }

    #[test]
    fn put_rejects_empty_payload() {
        let dir = tempdir().unwrap();
        let q = Queue::open("t_empty", dir.path(), cfg(1024)).unwrap();
        assert!(q.put(b"").is_err());
    }

    #[test]
    fn recovers_from_checkpoint_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let q = Queue::open("t_reopen", dir.path(), cfg(1024)).unwrap();
            q.put(b"hello").unwrap();
            q.flush().unwrap();
        }
        let q = Queue::open("t_reopen", dir.path(), cfg(1024)).unwrap();
        assert_eq!(q.queue_write_end().virtual_offset(), 9);
        assert_eq!(q.queue_write_end().total_msg_cnt(), Some(1));
    }
}
