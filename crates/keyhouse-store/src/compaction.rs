//! Background Segment Compaction
//!
//! Compaction coalesces every sealed segment into one that holds exactly
//! the most recent record per key, dropping shadowed versions and
//! tombstoned keys. It reclaims the space that rewrites and deletes leave
//! behind.
//!
//! ## Invariants
//!
//! - Compaction never changes logical state: a reader sees the same values
//!   before and after a run
//! - The active segment is never rewritten; writers keep landing on it for
//!   the whole run
//! - Readers see either the pre-compaction or post-compaction segments
//!   list, never a partial view
//!
//! ## Output Naming
//!
//! The merged segment takes over the file name of the *newest* sealed
//! input: the output is written to `segment-<n>.tmp` and renamed over
//! `segment-<n>` in one step. That keeps the numeric suffix order
//! `[merged, active]` intact for recovery, and a crash mid-run leaves only
//! a `.tmp` scratch file that recovery ignores. Older input files are
//! unlinked only after the swapped list is visible to readers; reads that
//! are already in flight hold their own file handles and complete
//! unharmed.
//!
//! ## Failure Policy
//!
//! A failed run is logged and discarded; the store continues on the
//! pre-compaction segment list and the next rollover nudges another
//! attempt.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use keyhouse_core::{Error, Result};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::segment::{segment_path, Segment};
use crate::store::StoreInner;

/// Compactor task: waits for nudges from the write path and runs a merge
/// for each, until shutdown.
pub(crate) async fn run(
    inner: Arc<StoreInner>,
    mut nudge_rx: mpsc::UnboundedReceiver<()>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            nudge = nudge_rx.recv() => {
                match nudge {
                    Some(()) => {
                        if let Err(e) = compact(&inner).await {
                            warn!(error = %e, "compaction failed, keeping existing segments");
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

/// Merges all sealed segments into one. No-op when fewer than
/// `compaction_threshold` sealed segments exist.
pub(crate) async fn compact(inner: &StoreInner) -> Result<()> {
    // Snapshot the sealed inputs; first of the two touches of the
    // segments lock.
    let inputs: Vec<Arc<Segment>> = {
        let segments = inner.segments.read().await;
        segments[..segments.len() - 1].to_vec()
    };

    if inputs.is_empty() || inputs.len() < inner.config.compaction_threshold {
        return Ok(());
    }

    let target_id = inputs
        .last()
        .map(|s| s.id())
        .expect("threshold is at least one input");

    // Stream the most recent record per key into the scratch file, newest
    // input first. Each segment's own index already points at the latest
    // in-segment record, so walking indexes (not raw records) is what
    // makes "first emission wins" correct.
    let tmp_path = inner.directory.join(format!("segment-{}.tmp", target_id));
    let mut out = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)
        .await?;

    let mut emitted: HashSet<String> = HashSet::new();
    let mut merged_index: HashMap<String, u64> = HashMap::new();
    let mut offset = 0u64;
    let mut input_records = 0usize;
    let mut tombstones_dropped = 0usize;

    for segment in inputs.iter().rev() {
        for (key, in_offset) in segment.index_entries().await {
            input_records += 1;
            if emitted.contains(&key) {
                continue;
            }

            let record = segment.get(in_offset).await?;
            if record.key != key {
                return Err(Error::CorruptRecord(format!(
                    "segment {} index for {:?} resolved to a record for {:?}",
                    segment.id(),
                    key,
                    record.key
                )));
            }

            emitted.insert(key.clone());

            // A tombstone shadows every older record for its key and is
            // itself dropped from the merged output.
            if record.is_tombstone() {
                tombstones_dropped += 1;
                continue;
            }

            let encoded = record.encode();
            out.write_all(&encoded).await?;
            merged_index.insert(key, offset);
            offset += encoded.len() as u64;
        }
    }

    out.flush().await?;
    out.sync_all().await?;
    drop(out);

    // Atomically take over the newest input's name; numeric order for
    // recovery stays [merged, active].
    let final_path = segment_path(&inner.directory, target_id);
    tokio::fs::rename(&tmp_path, &final_path).await?;

    let merged = Arc::new(Segment::from_compaction(
        final_path,
        target_id,
        merged_index,
        offset,
    ));

    // Swap; second of the two touches of the segments lock. Writers only
    // push new segments at the tail, so the first `inputs.len()` entries
    // are still exactly our snapshot.
    let obsolete: Vec<Arc<Segment>> = {
        let mut segments = inner.segments.write().await;
        let tail = segments.split_off(inputs.len());
        let obsolete = std::mem::replace(&mut *segments, Vec::with_capacity(tail.len() + 1));
        segments.push(Arc::clone(&merged));
        segments.extend(tail);
        obsolete
    };

    // Old files go away only after the swap is visible. The newest input's
    // path was renamed over and must stay.
    for segment in &obsolete {
        if segment.id() != target_id {
            if let Err(e) = tokio::fs::remove_file(segment.path()).await {
                warn!(
                    segment = segment.id(),
                    error = %e,
                    "failed to remove superseded segment file"
                );
            }
        }
    }

    info!(
        inputs = obsolete.len(),
        input_records,
        output_records = emitted.len() - tombstones_dropped,
        tombstones_dropped,
        output_bytes = offset,
        "compacted sealed segments"
    );

    Ok(())
}
