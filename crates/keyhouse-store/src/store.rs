//! Store - Write Path, Read Path, Rollover and Recovery
//!
//! The [`Store`] owns an ordered sequence of segments (oldest to active),
//! a single logical writer, and a background compactor.
//!
//! ## Concurrency Model
//!
//! Single-writer, many-reader:
//! - Every `put`/`delete` (and the rollover it may trigger) runs under one
//!   writer mutex, so successful writes are totally ordered and that order
//!   matches on-disk positions and index contents.
//! - Readers take a brief read lock to snapshot the segments list, then do
//!   all file I/O without holding it.
//! - The compactor runs in its own task and touches the segments lock
//!   exactly twice per run: once to snapshot its inputs, once to swap in
//!   the merged result.
//!
//! ## Read Semantics
//!
//! Readers walk segments newest to oldest and stop at the first index hit;
//! since only the most recent write to a key can live in the
//! newest-containing segment, that yields last-writer-wins without
//! scanning. A record resolved through a stale snapshot (possible exactly
//! across a compaction swap) decodes as corrupt or under the wrong key,
//! and the read retries once through a fresh snapshot.
//!
//! ## Recovery
//!
//! `open` enumerates `segment-<n>` files, sorts them by the integer
//! suffix, and rebuilds each segment's index by streaming its records.
//! The highest-numbered segment becomes the active one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use keyhouse_core::{Error, Record, Result};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::compaction;
use crate::config::StoreConfig;
use crate::segment::{parse_segment_id, Segment};

/// A log-structured, segmented key-value store.
pub struct Store {
    inner: Arc<StoreInner>,
    compactor: Mutex<Option<CompactorHandle>>,
}

struct CompactorHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub(crate) struct StoreInner {
    pub(crate) directory: PathBuf,
    pub(crate) config: StoreConfig,

    /// Ordered [oldest .. active]; never empty.
    pub(crate) segments: RwLock<Vec<Arc<Segment>>>,

    /// Serializes appends, index mutations and rollover.
    writer: Mutex<()>,

    next_segment_id: AtomicU64,

    compact_tx: mpsc::UnboundedSender<()>,
}

impl Store {
    /// Opens the store on `directory`, recovering any existing segments.
    ///
    /// Creates the directory and an empty `segment-0` when nothing exists
    /// yet, and spawns the background compactor.
    pub async fn open(directory: impl Into<PathBuf>, config: StoreConfig) -> Result<Self> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await?;

        let mut ids = scan_segment_ids(&directory).await?;
        ids.sort_unstable();

        let mut segments = Vec::with_capacity(ids.len().max(1));
        for (position, &id) in ids.iter().enumerate() {
            let sealed = position + 1 < ids.len();
            segments.push(Arc::new(Segment::recover(&directory, id, sealed).await?));
        }

        let next_segment_id = match ids.last() {
            Some(&max) => max + 1,
            None => {
                segments.push(Arc::new(Segment::create(&directory, 0).await?));
                1
            }
        };

        info!(
            directory = %directory.display(),
            segments = segments.len(),
            next_segment_id,
            "store opened"
        );

        let (compact_tx, compact_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let inner = Arc::new(StoreInner {
            directory,
            config,
            segments: RwLock::new(segments),
            writer: Mutex::new(()),
            next_segment_id: AtomicU64::new(next_segment_id),
            compact_tx,
        });

        let task = tokio::spawn(compaction::run(Arc::clone(&inner), compact_rx, shutdown_rx));

        let store = Self {
            inner,
            compactor: Mutex::new(Some(CompactorHandle { shutdown_tx, task })),
        };

        // Recovered directories can already be over the threshold.
        if store.sealed_segment_count().await >= store.inner.config.compaction_threshold {
            let _ = store.inner.compact_tx.send(());
        }

        Ok(store)
    }

    /// Writes `value` under `key`. Observable by in-process readers as soon
    /// as this returns.
    pub async fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.write_record(Record::put(key, value)).await
    }

    /// Deletes `key` by appending a tombstone. Deleting an absent key is
    /// not an error.
    pub async fn delete(&self, key: impl Into<String>) -> Result<()> {
        self.write_record(Record::tombstone(key)).await
    }

    async fn write_record(&self, record: Record) -> Result<()> {
        let encoded_len = record.encoded_len() as u64;

        let _writer = self.inner.writer.lock().await;

        let mut active = self.inner.active().await;
        // Rollover happens before the write; an oversized record still goes
        // into an empty active segment rather than rolling forever.
        if active.size() > 0 && active.size() + encoded_len > self.inner.config.size_limit {
            active = self.inner.rollover().await?;
        }

        let (offset, _) = active.append(&record).await?;
        active.insert(record.key, offset).await;

        Ok(())
    }

    /// Looks up the current value for `key`.
    ///
    /// Returns `Error::NotFound` when the key was never written or its
    /// newest record is a tombstone.
    pub async fn get(&self, key: &str) -> Result<String> {
        let mut last = self.get_once(key).await;
        // The offset can come from a segments view that a compaction swap
        // replaced mid-read: the record decodes as corrupt, under the
        // wrong key, or the superseded file is already gone. A fresh view
        // settles it.
        for _ in 0..2 {
            match last {
                Err(Error::CorruptRecord(_)) => last = self.get_once(key).await,
                Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    last = self.get_once(key).await;
                }
                other => return other,
            }
        }
        last
    }

    async fn get_once(&self, key: &str) -> Result<String> {
        let segments = self.inner.segments.read().await.clone();

        for segment in segments.iter().rev() {
            let Some(offset) = segment.lookup(key).await else {
                continue;
            };

            let record = segment.get(offset).await?;
            if record.key != key {
                return Err(Error::CorruptRecord(format!(
                    "index for {:?} resolved to a record for {:?}",
                    key, record.key
                )));
            }
            if record.is_tombstone() {
                return Err(Error::NotFound);
            }
            return Ok(record.value);
        }

        Err(Error::NotFound)
    }

    /// Stops the background compactor and flushes the active segment's
    /// writer. Sealed segments hold no open writer.
    pub async fn close(&self) -> Result<()> {
        if let Some(handle) = self.compactor.lock().await.take() {
            let _ = handle.shutdown_tx.send(());
            let _ = handle.task.await;
        }

        self.inner.active().await.flush().await?;
        debug!(directory = %self.inner.directory.display(), "store closed");
        Ok(())
    }

    /// Total number of segments, active included.
    pub async fn segment_count(&self) -> usize {
        self.inner.segments.read().await.len()
    }

    /// Number of sealed segments.
    pub async fn sealed_segment_count(&self) -> usize {
        self.inner.segments.read().await.len() - 1
    }

    /// The directory this store lives in.
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }
}

impl StoreInner {
    pub(crate) async fn active(&self) -> Arc<Segment> {
        let segments = self.segments.read().await;
        Arc::clone(segments.last().expect("segments list is never empty"))
    }

    /// Seals the active segment, installs a fresh one, and nudges the
    /// compactor when enough sealed segments have piled up. Runs under the
    /// writer mutex.
    async fn rollover(&self) -> Result<Arc<Segment>> {
        let mut segments = self.segments.write().await;

        let old = Arc::clone(segments.last().expect("segments list is never empty"));
        old.seal().await?;

        let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let fresh = Arc::new(Segment::create(&self.directory, id).await?);
        segments.push(Arc::clone(&fresh));

        let sealed_count = segments.len() - 1;
        drop(segments);

        debug!(
            sealed = old.id(),
            active = id,
            sealed_count,
            "segment rollover"
        );

        if sealed_count >= self.config.compaction_threshold {
            // The compactor may be mid-run; a lost nudge is re-sent on the
            // next rollover.
            let _ = self.compact_tx.send(());
        }

        Ok(fresh)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("directory", &self.inner.directory)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Collects the ids of every well-formed segment file in `dir`.
async fn scan_segment_ids(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(id) = parse_segment_id(name) {
            ids.push(id);
        }
    }

    Ok(ids)
}
