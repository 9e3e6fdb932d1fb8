/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::collaborators::ActivityContentStore;
use crate::error::{StreamError, StreamResult};
use crate::ref_store::{RefEntry, RefListStore, RefWalk};
use crate::stream_type::ListKey;
use std::sync::Arc;
use tracing::{debug, warn};

/// Read path over reference lists that drops entries whose activity is gone.
#[derive(Clone)]
pub struct SelfHealingReader {
    store: Arc<dyn RefListStore>,
    content: Arc<dyn ActivityContentStore>,
    scan_batch: usize,
}

/// What resolving one entry found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Live,
    /// Dangling and removed from its list.
    Pruned,
    /// Dangling but still stored: already gone, moved, or the prune failed.
    Dangling,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: u64,
    pub pruned: u64,
}

impl SelfHealingReader {
    pub fn new(store: Arc<dyn RefListStore>, content: Arc<dyn ActivityContentStore>, scan_batch: usize) -> Self {
        Self {
            store,
            content,
            scan_batch: scan_batch.max(1),
        }
    }

    /// Activity ids `offset..offset+limit` of the live entries of `list`,
    /// most recent first. Only entries whose activity still exists count
    /// towards `offset` and `limit`; the others are deleted on the way.
    pub fn page(&self, list: &ListKey, offset: usize, limit: usize) -> StreamResult<Vec<String>> {
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        let mut skipped = 0usize;
        for entry in RefWalk::new(self.store.as_ref(), list.clone(), self.scan_batch) {
            let entry = entry.map_err(StreamError::StoreUnavailable)?;
            if self.resolve(&entry)? != Liveness::Live {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            out.push(entry.activity_id);
            if out.len() == limit {
                break;
            }
        }
        Ok(out)
    }

    /// Checks up to `max_entries` of `list` and prunes the dangling ones.
    pub fn sweep(&self, list: &ListKey, max_entries: usize) -> StreamResult<SweepReport> {
        let mut report = SweepReport::default();
        let walk = RefWalk::new(self.store.as_ref(), list.clone(), self.scan_batch);
        for entry in walk.take(max_entries) {
            let entry = entry.map_err(StreamError::StoreUnavailable)?;
            report.scanned += 1;
            if self.resolve(&entry)? == Liveness::Pruned {
                report.pruned += 1;
            }
        }
        Ok(report)
    }

    /// Resolves the entry's activity, pruning the entry when it is dangling.
    fn resolve(&self, entry: &RefEntry) -> StreamResult<Liveness> {
        let exists = self
            .content
            .exists(&entry.activity_id)
            .map_err(StreamError::ContentUnavailable)?;
        if exists {
            return Ok(Liveness::Live);
        }
        match self.store.prune(entry) {
            Ok(true) => {
                debug!(
                    "pruned dangling entry {} from {}/{} (bucket {})",
                    entry.activity_id, entry.owner, entry.stream, entry.position.bucket
                );
                Ok(Liveness::Pruned)
            }
            Ok(false) => Ok(Liveness::Dangling),
            Err(e) => {
                warn!(
                    "failed to prune dangling entry {} from {}/{}: {e:#}",
                    entry.activity_id, entry.owner, entry.stream
                );
                Ok(Liveness::Dangling)
            }
        }
    }
}
