//! Durable commit log for the seat store.
//!
//! Every committed batch of mutations is written as one frame before it is
//! applied in memory. On open the log is replayed; a frame that cannot be
//! read back in full (torn write, checksum failure) ends the replay and is
//! truncated away, so a batch is either entirely present or entirely absent.

use super::feed::Commit;
use crate::error::{Result, VenueError};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::mem;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Magic bytes for the commit log.
const LOG_MAGIC: &[u8; 4] = b"SCL\0";

/// Current commit log format version.
const LOG_VERSION: u8 = 1;

const HEADER_LEN: u64 = 5;

/// Sanity bound on a single frame.
const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

/// Append-only log of committed batches.
pub struct CommitLog {
    path: PathBuf,
    writer: Mutex<LogWriter>,
    sync_every_commit: bool,
}

struct LogWriter {
    file: BufWriter<File>,
    /// Length of the file up to the end of the last acknowledged frame.
    committed_len: u64,
    /// Set when a failed append could not be rolled back yet.
    dirty: bool,
}

impl CommitLog {
    /// Open or create a log, returning it with every intact commit in order.
    pub fn open(path: impl AsRef<Path>, sync_every_commit: bool) -> Result<(Self, Vec<Commit>)> {
        let path = path.as_ref().to_path_buf();

        let commits = if path.exists() {
            Self::replay(&path)?
        } else {
            Self::write_header(&path)?;
            Vec::new()
        };

        let file = OpenOptions::new().append(true).open(&path)?;
        let committed_len = file.metadata()?.len();

        Ok((
            Self {
                path,
                writer: Mutex::new(LogWriter {
                    file: BufWriter::new(file),
                    committed_len,
                    dirty: false,
                }),
                sync_every_commit,
            },
            commits,
        ))
    }

    /// Append one commit as a single frame.
    ///
    /// A failed append is rolled back to the previous frame boundary. If the
    /// rollback fails too, every later append retries it first and fails
    /// until the file is clean again.
    pub fn append(&self, commit: &Commit) -> Result<()> {
        let frame = Self::encode_frame(commit)?;
        let mut writer = self.writer.lock();

        if writer.dirty || writer.file.get_ref().metadata()?.len() != writer.committed_len {
            self.roll_back(&mut writer)?;
        }

        match self.write_durable(&mut writer.file, &frame) {
            Ok(()) => {
                writer.committed_len += frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                writer.dirty = true;
                if let Err(rollback) = self.roll_back(&mut writer) {
                    error!(error = %rollback, "Failed to roll back partial commit frame");
                }
                Err(e)
            }
        }
    }

    /// Force buffered frames to disk.
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.file.flush()?;
        writer.file.get_ref().sync_all()?;
        Ok(())
    }

    /// Atomically replace the log contents with `commits`.
    pub fn rewrite(&self, commits: &[Commit]) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.file.flush()?;

        let staging = self.path.with_extension("compact");
        Self::write_header(&staging)?;
        {
            let mut out = BufWriter::new(OpenOptions::new().append(true).open(&staging)?);
            for commit in commits {
                out.write_all(&Self::encode_frame(commit)?)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&staging, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        writer.committed_len = file.metadata()?.len();
        writer.dirty = false;
        Self::replace_file(&mut writer, file);
        Ok(())
    }

    /// Current size of the log file in bytes.
    pub fn size(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    fn write_header(path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(LOG_MAGIC)?;
        file.write_all(&[LOG_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn replay(path: &Path) -> Result<Vec<Commit>> {
        let file = File::open(path)?;
        let total_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(VenueError::InvalidFormat("Invalid commit log magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(VenueError::InvalidFormat(format!(
                "Unsupported commit log version: {}",
                version[0]
            )));
        }

        let mut commits: Vec<Commit> = Vec::new();
        let mut good_len = HEADER_LEN;

        loop {
            match Self::read_frame(&mut reader) {
                Ok(Some((commit, frame_len))) => {
                    if let Some(last) = commits.last() {
                        if commit.sequence <= last.sequence {
                            return Err(VenueError::Corruption(format!(
                                "commit sequence {} does not follow {}",
                                commit.sequence, last.sequence
                            )));
                        }
                    }
                    good_len += frame_len;
                    commits.push(commit);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, offset = good_len, "Unreadable commit frame, discarding tail");
                    break;
                }
            }
        }

        if good_len < total_len {
            warn!(
                discarded_bytes = total_len - good_len,
                "Truncating incomplete commit log tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(good_len)?;
            file.sync_all()?;
        }

        Ok(commits)
    }

    /// Frame layout: `len u32 LE | rmp bytes | crc32 LE`.
    fn encode_frame(commit: &Commit) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec_named(commit)?;

        let mut frame = Vec::with_capacity(encoded.len() + 8);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
        Ok(frame)
    }

    fn write_durable(&self, file: &mut BufWriter<File>, frame: &[u8]) -> Result<()> {
        file.write_all(frame)?;
        file.flush()?;
        if self.sync_every_commit {
            file.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Cut the file back to the last acknowledged frame and drop anything
    /// still buffered.
    fn roll_back(&self, writer: &mut LogWriter) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let len = file.metadata()?.len();
        if len != writer.committed_len {
            warn!(
                discarded_bytes = len.saturating_sub(writer.committed_len),
                "Rolling back partial commit frame"
            );
            file.set_len(writer.committed_len)?;
            file.sync_data()?;
        }
        Self::replace_file(writer, file);
        writer.dirty = false;
        Ok(())
    }

    fn replace_file(writer: &mut LogWriter, file: File) {
        let stale = mem::replace(&mut writer.file, BufWriter::new(file));
        // Unwritten bytes belong to a failed frame; dropping the BufWriter
        // would flush them.
        let _ = stale.into_parts();
    }

    /// Returns `None` at a clean or torn end of file.
    fn read_frame(reader: &mut impl Read) -> Result<Option<(Commit, u64)>> {
        let mut len_bytes = [0u8; 4];
        if !read_fully(reader, &mut len_bytes)? {
            return Ok(None);
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(VenueError::Corruption("commit frame too large".into()));
        }

        let mut encoded = vec![0u8; len];
        if !read_fully(reader, &mut encoded)? {
            return Ok(None);
        }

        let mut checksum_bytes = [0u8; 4];
        if !read_fully(reader, &mut checksum_bytes)? {
            return Ok(None);
        }
        let expected = u32::from_le_bytes(checksum_bytes);
        let got = crc32fast::hash(&encoded);
        if expected != got {
            return Err(VenueError::ChecksumMismatch { expected, got });
        }

        let commit = rmp_serde::from_slice(&encoded)?;
        Ok(Some((commit, 4 + len as u64 + 4)))
    }
}

fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seats::feed::{Mutation, MutationKind};
    use crate::types::{MapMetadata, Seat, SeatKind, SeatStatus, Sequence, Timestamp};
    use tempfile::TempDir;

    fn commit(sequence: u64, seat_id: &str) -> Commit {
        Commit {
            sequence: Sequence(sequence),
            timestamp: Timestamp::now(),
            mutations: vec![
                Mutation::Map(MapMetadata::draft("hall")),
                Mutation::Seat {
                    kind: MutationKind::Insert,
                    seat: Seat {
                        map_id: "hall".into(),
                        seat_id: seat_id.into(),
                        status: SeatStatus::Available,
                        hold_expires_at: None,
                        zone_id: Some("floor".into()),
                        seat_kind: SeatKind::Standard,
                        position: None,
                        source_tag: "circle".into(),
                    },
                },
            ],
        }
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commits.log");

        {
            let (log, replayed) = CommitLog::open(&path, true).unwrap();
            assert!(replayed.is_empty());
            log.append(&commit(1, "seat-1")).unwrap();
            log.append(&commit(2, "seat-2")).unwrap();
        }

        let (_, replayed) = CommitLog::open(&path, true).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0], commit_with_ts(&replayed[0], 1, "seat-1"));
        assert_eq!(replayed[1].sequence, Sequence(2));
    }

    fn commit_with_ts(actual: &Commit, sequence: u64, seat_id: &str) -> Commit {
        let mut expected = commit(sequence, seat_id);
        expected.timestamp = actual.timestamp;
        expected
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commits.log");

        {
            let (log, _) = CommitLog::open(&path, true).unwrap();
            log.append(&commit(1, "seat-1")).unwrap();
            log.append(&commit(2, "seat-2")).unwrap();
        }

        // Chop the last frame in half.
        let len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 10).unwrap();
        drop(file);

        let (log, replayed) = CommitLog::open(&path, true).unwrap();
        assert_eq!(replayed.len(), 1);

        // Appends after truncation land on a clean boundary.
        log.append(&commit(2, "seat-3")).unwrap();
        drop(log);
        let (_, replayed) = CommitLog::open(&path, true).unwrap();
        assert_eq!(replayed.len(), 2);
    }

    #[test]
    fn test_checksum_failure_stops_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commits.log");

        {
            let (log, _) = CommitLog::open(&path, true).unwrap();
            log.append(&commit(1, "seat-1")).unwrap();
        }

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let (_, replayed) = CommitLog::open(&path, true).unwrap();
        assert!(replayed.is_empty());
        assert_eq!(fs::metadata(&path).unwrap().len(), HEADER_LEN);
    }

    #[test]
    fn test_failed_append_is_rolled_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commits.log");

        let (log, _) = CommitLog::open(&path, true).unwrap();
        log.append(&commit(1, "seat-1")).unwrap();
        let clean_len = log.size().unwrap();

        // A write that died halfway: part of the frame reached the file and
        // the rest is still buffered.
        {
            let mut writer = log.writer.lock();
            let frame = CommitLog::encode_frame(&commit(2, "seat-lost")).unwrap();
            writer.file.write_all(&frame[..frame.len() / 2]).unwrap();
            writer.file.flush().unwrap();
            writer.file.write_all(&frame[frame.len() / 2..]).unwrap();
            writer.dirty = true;
        }

        log.append(&commit(2, "seat-2")).unwrap();
        assert!(log.size().unwrap() > clean_len);
        drop(log);

        let (_, replayed) = CommitLog::open(&path, true).unwrap();
        let sequences: Vec<_> = replayed.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![Sequence(1), Sequence(2)]);
        assert_eq!(replayed[1], commit_with_ts(&replayed[1], 2, "seat-2"));
    }

    #[test]
    fn test_roll_back_discards_buffered_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commits.log");

        let (log, _) = CommitLog::open(&path, false).unwrap();
        log.append(&commit(1, "seat-1")).unwrap();
        let clean_len = log.size().unwrap();

        {
            let mut writer = log.writer.lock();
            writer.file.write_all(b"partial").unwrap();
            log.roll_back(&mut writer).unwrap();
            assert!(!writer.dirty);
        }
        log.sync().unwrap();
        assert_eq!(log.size().unwrap(), clean_len);
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commits.log");
        fs::write(&path, b"NOPE!").unwrap();
        assert!(matches!(
            CommitLog::open(&path, true),
            Err(VenueError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_rewrite_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commits.log");

        let (log, _) = CommitLog::open(&path, false).unwrap();
        for i in 1..=5 {
            log.append(&commit(i, &format!("seat-{i}"))).unwrap();
        }
        let before = log.size().unwrap();

        log.rewrite(&[commit(5, "seat-5")]).unwrap();
        assert!(log.size().unwrap() < before);
        log.append(&commit(6, "seat-6")).unwrap();
        drop(log);

        let (_, replayed) = CommitLog::open(&path, false).unwrap();
        let sequences: Vec<_> = replayed.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![Sequence(5), Sequence(6)]);
    }
}
