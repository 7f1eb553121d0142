//! Segment Files
//!
//! A segment is an append-only file holding a contiguous run of encoded
//! records, plus an in-memory index mapping each key to the byte offset of
//! its most recent record *within this segment*.
//!
//! ## Segment Lifecycle
//! 1. Created by rollover (or by compaction) as the `growing` segment
//! 2. Accepts appends from the store's single writer
//! 3. Sealed when it stops being the active segment; sealed segments are
//!    byte-immutable and hold no open writer
//! 4. Destroyed only when a compaction supersedes it
//!
//! ## File Naming
//! Segment files are named `segment-<n>` with a plain integer suffix.
//! Recovery reconstructs chronological order from the suffix, never from
//! filesystem mtime. Anything else in the directory (for example a crashed
//! compactor's `segment-<n>.tmp`) is ignored.
//!
//! ## Concurrency
//! Appends come from exactly one writer (enforced by the store). Point
//! reads open the file read-only per call and are safe concurrently with
//! appends on the active segment and with each other.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use keyhouse_core::record::{read_record, RECORD_OVERHEAD};
use keyhouse_core::{Error, Record, Result};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

/// Prefix shared by every segment file in a store directory.
pub const SEGMENT_FILE_PREFIX: &str = "segment-";

/// Builds the path of segment `id` inside `dir`.
pub(crate) fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}{}", SEGMENT_FILE_PREFIX, id))
}

/// Parses a segment id out of a file name, rejecting anything that is not
/// exactly `segment-<integer>`.
pub(crate) fn parse_segment_id(file_name: &str) -> Option<u64> {
    file_name.strip_prefix(SEGMENT_FILE_PREFIX)?.parse().ok()
}

/// An append-only segment file with its in-memory offset index.
pub struct Segment {
    id: u64,
    path: PathBuf,

    /// key -> byte offset of the record's first byte within this file
    index: RwLock<HashMap<String, u64>>,

    /// Current on-disk size in bytes
    size: AtomicU64,

    sealed: AtomicBool,

    /// Append handle; present only while the segment is growing
    writer: Mutex<Option<File>>,
}

impl Segment {
    /// Creates a fresh, empty, growing segment in `dir`.
    pub async fn create(dir: &Path, id: u64) -> Result<Self> {
        let path = segment_path(dir, id);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            id,
            path,
            index: RwLock::new(HashMap::new()),
            size: AtomicU64::new(0),
            sealed: AtomicBool::new(false),
            writer: Mutex::new(Some(file)),
        })
    }

    /// Opens an existing segment file and rebuilds its index by streaming
    /// records from offset 0.
    ///
    /// A clean end-of-file at a record boundary stops the scan. An
    /// end-of-file in the middle of a record means a torn write from a
    /// crash; the file is truncated back to the last clean boundary.
    pub async fn recover(dir: &Path, id: u64, sealed: bool) -> Result<Self> {
        let path = segment_path(dir, id);
        let file_len = tokio::fs::metadata(&path).await?.len();

        let mut index = HashMap::new();
        let mut offset = 0u64;

        {
            let file = File::open(&path).await?;
            let mut reader = BufReader::new(file);

            loop {
                match read_record(&mut reader).await {
                    Ok(Some(record)) => {
                        let encoded_len = record.encoded_len() as u64;
                        index.insert(record.key, offset);
                        offset += encoded_len;
                    }
                    Ok(None) => break,
                    Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                    Err(e) => return Err(e),
                }
            }
        }

        // A torn write from a crash leaves bytes past the last clean record
        // boundary (a partial body, or a partial length header short enough
        // to read as end-of-file). Either way, cut back to the boundary.
        if offset < file_len {
            warn!(
                segment = id,
                offset, file_len, "partial record at end of segment, truncating"
            );
            let file = OpenOptions::new().write(true).open(&path).await?;
            file.set_len(offset).await?;
            file.sync_all().await?;
        }

        let writer = if sealed {
            None
        } else {
            Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await?,
            )
        };

        Ok(Self {
            id,
            path,
            index: RwLock::new(index),
            size: AtomicU64::new(offset),
            sealed: AtomicBool::new(sealed),
            writer: Mutex::new(writer),
        })
    }

    /// Builds a sealed segment from parts the compactor already has in
    /// hand, avoiding a re-scan of the file it just wrote.
    pub(crate) fn from_compaction(
        path: PathBuf,
        id: u64,
        index: HashMap<String, u64>,
        size: u64,
    ) -> Self {
        Self {
            id,
            path,
            index: RwLock::new(index),
            size: AtomicU64::new(size),
            sealed: AtomicBool::new(true),
            writer: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current on-disk size in bytes.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Appends an encoded record, returning `(offset, bytes_written)` where
    /// `offset` is the position of the record's first byte.
    ///
    /// The store guarantees a single writer; the internal lock only guards
    /// against misuse.
    pub async fn append(&self, record: &Record) -> Result<(u64, u64)> {
        let encoded = record.encode();

        let mut writer = self.writer.lock().await;
        let file = writer.as_mut().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "append to sealed segment",
            ))
        })?;

        file.write_all(&encoded).await?;
        // Push through tokio's internal buffer so independent read handles
        // observe the record immediately.
        file.flush().await?;

        let offset = self
            .size
            .fetch_add(encoded.len() as u64, Ordering::AcqRel);
        Ok((offset, encoded.len() as u64))
    }

    /// Reads and decodes the record starting at `offset`.
    ///
    /// Opens its own read handle, so it is safe concurrently with appends
    /// and with other reads. Framing problems at the offset (including a
    /// short read) surface as `CorruptRecord`; callers that resolved the
    /// offset from a stale segments view use that to retry.
    pub async fn get(&self, offset: u64) -> Result<Record> {
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut len_buf = [0u8; 4];
        read_frame(&mut file, &mut len_buf).await?;

        let total = u32::from_le_bytes(len_buf) as usize;
        if total < RECORD_OVERHEAD {
            return Err(Error::CorruptRecord(format!(
                "declared length {} below minimum at offset {}",
                total, offset
            )));
        }

        let mut buf = vec![0u8; total];
        buf[..4].copy_from_slice(&len_buf);
        read_frame(&mut file, &mut buf[4..]).await?;

        Record::decode(&buf)
    }

    /// Looks up the in-segment offset for `key`.
    pub async fn lookup(&self, key: &str) -> Option<u64> {
        self.index.read().await.get(key).copied()
    }

    /// Records that `key`'s most recent record in this segment starts at
    /// `offset`. Called by the store's writer after a successful append.
    pub(crate) async fn insert(&self, key: String, offset: u64) {
        self.index.write().await.insert(key, offset);
    }

    /// Snapshot of the index, used by the compactor to emit exactly the
    /// most recent record per key.
    pub(crate) async fn index_entries(&self) -> Vec<(String, u64)> {
        self.index
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Number of distinct keys indexed in this segment.
    pub async fn key_count(&self) -> usize {
        self.index.read().await.len()
    }

    /// Seals the segment: flushes and drops the append handle. Sealed
    /// segments never accept another append.
    pub async fn seal(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if let Some(mut file) = writer.take() {
            file.flush().await?;
        }
        self.sealed.store(true, Ordering::Release);
        Ok(())
    }

    /// Flushes the append handle without sealing. Used by store close.
    pub(crate) async fn flush(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if let Some(file) = writer.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("size", &self.size())
            .field("sealed", &self.is_sealed())
            .finish_non_exhaustive()
    }
}

/// `read_exact` that converts a short read into `CorruptRecord` instead of
/// a bare I/O error, so stale-offset readers can distinguish "retry through
/// the fresh segments view" from a real disk failure.
async fn read_frame(file: &mut File, buf: &mut [u8]) -> Result<()> {
    match file.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::CorruptRecord(
            "record extends beyond segment".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}
