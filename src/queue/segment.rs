//! Segment file naming, discovery and the metadata checkpoint.
//!
//! Pure, stateless functions over paths — no open file descriptors, no
//! locking. `DiskQueueWriter` and `DiskQueueReader` both build on this,
//! the way the teacher's `segment_store` module underlies both `Queue`
//! and `Log`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::error::{Error, Result};
use super::offset::{FilePos, Offset};

/// Segment data file: `<name>.diskqueue.<FileNum>.dat`.
pub fn segment_filename(name: &str, file_num: u64) -> String {
    format!("{name}.diskqueue.{file_num}.dat")
}

pub fn segment_path(dir: &Path, name: &str, file_num: u64) -> PathBuf {
    dir.join(segment_filename(name, file_num))
}

/// Checkpoint file: `<name>.diskqueue.meta.dat`.
pub fn metadata_filename(name: &str) -> String {
    format!("{name}.diskqueue.meta.dat")
}

pub fn metadata_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(metadata_filename(name))
}

pub fn metadata_temp_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.tmp", metadata_filename(name)))
}

/// Lists the `FileNum`s of segment files present for `name`, ascending.
pub fn discover_segments(dir: &Path, name: &str) -> Result<Vec<u64>> {
    let prefix = format!("{name}.diskqueue.");
    let mut found = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(err) => return Err(Error::io(dir, err)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let file_name = entry.file_name();
        let file_name = match file_name.to_str() {
            Some(s) => s,
            None => continue,
        };
        let Some(rest) = file_name.strip_prefix(&prefix) else {
            continue;
        };
        let Some(num_str) = rest.strip_suffix(".dat") else {
            continue;
        };
        if num_str == "meta" {
            continue;
        }
        if let Ok(num) = num_str.parse::<u64>() {
            found.push(num);
        }
    }
    found.sort_unstable();
    Ok(found)
}

/// Removes every segment file for `name` with `file_num < below`.
/// Idempotent: missing files are not an error.
pub fn reap(dir: &Path, name: &str, below: u64) -> Result<Vec<u64>> {
    let mut removed = Vec::new();
    for file_num in discover_segments(dir, name)? {
        if file_num >= below {
            continue;
        }
        let path = segment_path(dir, name, file_num);
        match fs::remove_file(&path) {
            Ok(()) => removed.push(file_num),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::io(path, err)),
        }
    }
    Ok(removed)
}

/// Removes every segment file for `name`, regardless of position.
pub fn remove_all(dir: &Path, name: &str) -> Result<()> {
    for file_num in discover_segments(dir, name)? {
        let path = segment_path(dir, name, file_num);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::io(path, err)),
        }
    }
    Ok(())
}

/// The writer-side checkpoint: total message count plus the write, read
/// and confirmed cursors, exactly as laid out in the external interface
/// (stable text format, `write(tmp) + rename(tmp, final)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueMetadata {
    pub total_msg_cnt: u64,
    pub write: Offset,
    pub read: Offset,
    pub confirmed: Offset,
}

/// Reads and validates the checkpoint. `Ok(None)` means no checkpoint
/// exists yet (a fresh queue); `Err(CorruptMetadata)` means one exists
/// but failed its checksum or could not be parsed, and the caller should
/// fall back to scan-based recovery.
pub fn load_metadata(dir: &Path, name: &str) -> Result<Option<QueueMetadata>> {
    let path = metadata_path(dir, name);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::io(path, err)),
    };
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        lines.push(line.map_err(|e| Error::io(&path, e))?);
    }
    if lines.len() != 5 {
        return Err(Error::CorruptMetadata("unexpected line count"));
    }
    let body = lines[0..4].join("\n");
    let expected_crc: u32 = lines[4]
        .parse()
        .map_err(|_| Error::CorruptMetadata("checksum line is not a number"))?;
    if crc32fast::hash(body.as_bytes()) != expected_crc {
        return Err(Error::CorruptMetadata("checksum mismatch"));
    }

    let total_msg_cnt: u64 = lines[0]
        .trim()
        .parse()
        .map_err(|_| Error::CorruptMetadata("total message count is not a number"))?;
    let write = parse_triple(&lines[1])?;
    let read = parse_triple(&lines[2])?;
    let confirmed = parse_triple(&lines[3])?;

    Ok(Some(QueueMetadata {
        total_msg_cnt,
        write,
        read,
        confirmed,
    }))
}

fn parse_triple(line: &str) -> Result<Offset> {
    let mut parts = line.trim().split_whitespace();
    let file_num: u64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or(Error::CorruptMetadata("missing file number"))?;
    let pos: u64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or(Error::CorruptMetadata("missing position"))?;
    let virtual_offset: u64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or(Error::CorruptMetadata("missing virtual offset"))?;
    if parts.next().is_some() {
        return Err(Error::CorruptMetadata("trailing tokens in offset line"));
    }
    Ok(Offset::new(FilePos::new(file_num, pos), virtual_offset))
}

/// Writes the checkpoint via `write(tmp) + rename(tmp, final)`, so a
/// crash never leaves a half-written metadata file in place of a good
/// one.
pub fn store_metadata(dir: &Path, name: &str, meta: &QueueMetadata) -> Result<()> {
    let body = format!(
        "{}\n{} {} {}\n{} {} {}\n{} {} {}",
        meta.total_msg_cnt,
        meta.write.file.file_num,
        meta.write.file.pos,
        meta.write.virtual_offset,
        meta.read.file.file_num,
        meta.read.file.pos,
        meta.read.virtual_offset,
        meta.confirmed.file.file_num,
        meta.confirmed.file.pos,
        meta.confirmed.virtual_offset,
    );
    let crc = crc32fast::hash(body.as_bytes());

    let tmp_path = metadata_temp_path(dir, name);
    let final_path = metadata_path(dir, name);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| Error::io(&tmp_path, e))?;
        writeln!(file, "{body}\n{crc}").map_err(|e| Error::io(&tmp_path, e))?;
        file.sync_all().map_err(|e| Error::io(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, &final_path).map_err(|e| Error::io(&final_path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn metadata_round_trips() {
        let dir = tempdir().unwrap();
        let meta = QueueMetadata {
            total_msg_cnt: 7,
            write: Offset::new(FilePos::new(1, 20), 140),
            read: Offset::new(FilePos::new(0, 50), 50),
            confirmed: Offset::new(FilePos::new(0, 30), 30),
        };
        store_metadata(dir.path(), "t_0", &meta).unwrap();
        let loaded = load_metadata(dir.path(), "t_0").unwrap().unwrap();
        assert_eq!(loaded, meta);
    }

    #[test]
    fn missing_metadata_is_none_not_error() {
        let dir = tempdir().unwrap();
        assert!(load_metadata(dir.path(), "nope").unwrap().is_none());
    }

    #[test]
    fn torn_metadata_is_corrupt_not_missing() {
        let dir = tempdir().unwrap();
        let path = metadata_path(dir.path(), "t_0");
        fs::write(&path, "7\n1 20 140\n0 50 50\n").unwrap();
        assert!(matches!(
            load_metadata(dir.path(), "t_0"),
            Err(Error::CorruptMetadata(_))
        ));
    }

    #[test]
    fn discover_and_reap_segments() {
        let dir = tempdir().unwrap();
        for n in 0..5u64 {
            fs::write(segment_path(dir.path(), "t_0", n), b"x").unwrap();
        }
        assert_eq!(discover_segments(dir.path(), "t_0").unwrap(), vec![0, 1, 2, 3, 4]);
        let removed = reap(dir.path(), "t_0", 3).unwrap();
        assert_eq!(removed, vec![0, 1, 2]);
        assert_eq!(discover_segments(dir.path(), "t_0").unwrap(), vec![3, 4]);
    }
}
