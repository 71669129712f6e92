//! Durable append log
//!
//! Every mutation of the store is appended as one frame:
//!
//! ```text
//! u32 LE  payload length
//! u8      kind (1 = upsert, 2 = tombstone)
//! [u8;4]  first four bytes of SHA-256(payload)
//! [u8]    payload (encoded record, or 16-byte id for a tombstone)
//! ```
//!
//! Replay is last-write-wins per id. A frame whose header or checksum is
//! unusable starts a damaged region: replay scans forward to the next intact
//! frame and carries on from there, counting the region once. Skipped bytes
//! are copied to `knowledge.log.corrupt-<digest>` before anything else
//! happens to the file. Only a damaged region that runs to the end of the
//! file is cut off, so later appends stay reachable.

use byteorder::{LittleEndian, WriteBytesExt};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::codec;
use crate::domain::knowledge::KnowledgeEntry;
use crate::error::Result;

const FRAME_HEADER_LEN: usize = 9;
const SIDECAR_INFIX: &str = ".corrupt-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Upsert = 1,
    Tombstone = 2,
}

impl FrameKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Upsert),
            2 => Some(Self::Tombstone),
            _ => None,
        }
    }
}

/// One replayed log record
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Upsert(KnowledgeEntry),
    Tombstone(Uuid),
}

/// Result of replaying a log file
#[derive(Debug, Default)]
pub struct LogReplay {
    pub records: Vec<LogRecord>,
    /// Skipped frames and damaged regions
    pub corrupt: usize,
    /// The file ends in bytes no intact frame could be read from
    pub truncated_tail: bool,
    /// Bytes up to the end of the last intact frame
    pub valid_len: u64,
    /// Byte ranges skipped while resynchronising
    pub damaged: Vec<Range<usize>>,
    /// Where the damaged bytes were copied, if any
    pub preserved: Option<PathBuf>,
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Serialize one frame
pub fn frame(kind: FrameKind, payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        crate::error::Error::InvalidInput(format!("frame payload of {} bytes is too large", payload.len()))
    })?;
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.write_u32::<LittleEndian>(len)?;
    buf.write_u8(kind as u8)?;
    buf.extend_from_slice(&checksum(payload));
    buf.extend_from_slice(payload);
    Ok(buf)
}

enum Frame<'a> {
    /// Length fits and the checksum matches; kind not yet interpreted
    Intact { kind: u8, payload: &'a [u8], end: usize },
    Damaged,
}

fn read_frame(bytes: &[u8], offset: usize) -> Frame<'_> {
    let Some(header) = offset
        .checked_add(FRAME_HEADER_LEN)
        .and_then(|header_end| bytes.get(offset..header_end))
    else {
        return Frame::Damaged;
    };
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let start = offset + FRAME_HEADER_LEN;
    let Some(payload) = start.checked_add(len).and_then(|end| bytes.get(start..end)) else {
        return Frame::Damaged;
    };
    if checksum(payload) != [header[5], header[6], header[7], header[8]] {
        return Frame::Damaged;
    }
    Frame::Intact {
        kind: header[4],
        payload,
        end: start + len,
    }
}

/// First offset at or after `from` holding an intact frame of a known kind
fn resync(bytes: &[u8], from: usize) -> Option<usize> {
    let last = bytes.len().checked_sub(FRAME_HEADER_LEN)?;
    (from..=last).find(|&offset| {
        FrameKind::from_byte(bytes[offset + 4]).is_some() && matches!(read_frame(bytes, offset), Frame::Intact { .. })
    })
}

fn apply(replay: &mut LogReplay, kind: u8, payload: &[u8], offset: usize) {
    match FrameKind::from_byte(kind) {
        Some(FrameKind::Upsert) => match codec::decode(payload) {
            Ok(entry) => replay.records.push(LogRecord::Upsert(entry)),
            Err(e) => {
                warn!(offset, error = %e, "Skipping undecodable log record");
                replay.corrupt += 1;
            }
        },
        Some(FrameKind::Tombstone) => match Uuid::from_slice(payload) {
            Ok(id) => replay.records.push(LogRecord::Tombstone(id)),
            Err(_) => {
                warn!(offset, "Skipping malformed tombstone");
                replay.corrupt += 1;
            }
        },
        None => {
            warn!(offset, kind, "Skipping log frame of unknown kind");
            replay.corrupt += 1;
        }
    }
}

/// Parse every frame in `bytes`
pub fn replay_bytes(bytes: &[u8]) -> LogReplay {
    let mut replay = LogReplay::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        match read_frame(bytes, offset) {
            Frame::Intact { kind, payload, end } => {
                apply(&mut replay, kind, payload, offset);
                offset = end;
            }
            Frame::Damaged => {
                replay.corrupt += 1;
                match resync(bytes, offset + 1) {
                    Some(next) => {
                        warn!(offset, skipped = next - offset, "Skipping damaged log region");
                        replay.damaged.push(offset..next);
                        offset = next;
                    }
                    None => {
                        warn!(offset, skipped = bytes.len() - offset, "Log ends in an unreadable region");
                        replay.damaged.push(offset..bytes.len());
                        replay.truncated_tail = true;
                        break;
                    }
                }
            }
        }
    }

    replay.valid_len = offset as u64;
    replay
}

/// `<log>.corrupt-<digest>`; the same damaged bytes always map to the same file
fn sidecar_path(log: &Path, damaged: &[u8]) -> PathBuf {
    let digest = Sha256::digest(damaged);
    let mut name = log.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(SIDECAR_INFIX);
    name.push(hex::encode(&digest[..8]));
    log.with_file_name(name)
}

/// Append-only log file
#[derive(Debug)]
pub struct AppendLog {
    path: PathBuf,
    file: File,
}

impl AppendLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay the file. Damaged bytes are copied aside first; a damaged tail
    /// is cut off only once that copy is on disk.
    pub fn replay(&self) -> Result<LogReplay> {
        let bytes = fs::read(&self.path)?;
        let mut replay = replay_bytes(&bytes);

        if !replay.damaged.is_empty() {
            match self.preserve(&bytes, &replay.damaged) {
                Ok(path) => replay.preserved = Some(path),
                Err(e) => warn!(path = %self.path.display(), error = %e, "Could not copy damaged log bytes aside"),
            }
        }

        if replay.truncated_tail {
            if replay.preserved.is_some() {
                warn!(
                    path = %self.path.display(),
                    dropped = bytes.len() as u64 - replay.valid_len,
                    "Cutting unreadable tail off the log"
                );
                self.file.set_len(replay.valid_len)?;
            } else {
                warn!(path = %self.path.display(), "Leaving unreadable tail in place");
            }
        }

        debug!(
            path = %self.path.display(),
            records = replay.records.len(),
            corrupt = replay.corrupt,
            "Replayed append log"
        );
        Ok(replay)
    }

    fn preserve(&self, bytes: &[u8], damaged: &[Range<usize>]) -> Result<PathBuf> {
        let region: Vec<u8> = damaged.iter().flat_map(|range| bytes[range.clone()].iter().copied()).collect();
        let path = sidecar_path(&self.path, &region);
        if !path.exists() {
            let mut file = File::create(&path)?;
            file.write_all(&region)?;
            file.sync_all()?;
            warn!(path = %path.display(), bytes = region.len(), "Copied damaged log bytes aside");
        }
        Ok(path)
    }

    pub fn append_upsert(&mut self, entry: &KnowledgeEntry) -> Result<()> {
        let payload = codec::encode(entry)?;
        self.file.write_all(&frame(FrameKind::Upsert, &payload)?)?;
        Ok(())
    }

    pub fn append_tombstone(&mut self, id: Uuid) -> Result<()> {
        self.file.write_all(&frame(FrameKind::Tombstone, id.as_bytes())?)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Drop every frame; called once the compacted file holds the same state
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn size_bytes(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}
