/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::collaborators::{ActivityStamp, IdentityKey};
use crate::stream_type::{ListKey, StreamType};
use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

const DAY_MS: i64 = 24 * 3600 * 1000;

/// Day partition of a reference list (UTC days since the unix epoch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(pub i64);

impl BucketKey {
    pub fn from_unix_ms(ms: i64) -> Self {
        Self(ms.div_euclid(DAY_MS))
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match time::OffsetDateTime::UNIX_EPOCH.checked_add(time::Duration::days(self.0)) {
            Some(t) => write!(f, "{}", t.date()),
            None => write!(f, "day{}", self.0),
        }
    }
}

/// Total order of entries in a list; lists iterate in descending position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryPosition {
    pub bucket: BucketKey,
    pub created_at_ms: i64,
    pub seq: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    pub owner: IdentityKey,
    pub stream: StreamType,
    pub activity_id: String,
    pub last_updated_ms: i64,
    pub position: EntryPosition,
}

impl RefEntry {
    pub fn list(&self) -> ListKey {
        ListKey {
            owner: self.owner.clone(),
            stream: self.stream,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Entry existed; its `last_updated_ms` was rewritten in place.
    Refreshed,
    Unchanged,
}

/// Per-(identity, stream) ordered reference lists.
///
/// `upsert` and `remove` are idempotent and each is applied atomically
/// against a single list.
pub trait RefListStore: Send + Sync {
    fn upsert(&self, list: &ListKey, stamp: &ActivityStamp) -> Result<UpsertOutcome>;

    /// Returns false when nothing was stored for the activity.
    fn remove(&self, list: &ListKey, activity_id: &str) -> Result<bool>;

    /// Removes `entry` only if it still sits at the same position, so a
    /// concurrent re-insert is never lost to a stale prune.
    fn prune(&self, entry: &RefEntry) -> Result<bool>;

    fn get(&self, list: &ListKey, activity_id: &str) -> Result<Option<RefEntry>>;

    /// Up to `limit` entries strictly after `after`, most recent first.
    fn scan(&self, list: &ListKey, after: Option<EntryPosition>, limit: usize) -> Result<Vec<RefEntry>>;

    fn count(&self, list: &ListKey) -> Result<u64>;

    /// Lists ever written to, in key order, strictly after `after`.
    fn lists(&self, after: Option<&ListKey>, limit: usize) -> Result<Vec<ListKey>>;

    fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Lazy walk over one list, fetching `batch` entries per store round trip.
pub struct RefWalk<'a> {
    store: &'a dyn RefListStore,
    list: ListKey,
    batch: usize,
    buf: std::vec::IntoIter<RefEntry>,
    cursor: Option<EntryPosition>,
    done: bool,
}

impl<'a> RefWalk<'a> {
    pub fn new(store: &'a dyn RefListStore, list: ListKey, batch: usize) -> Self {
        Self {
            store,
            list,
            batch: batch.max(1),
            buf: Vec::new().into_iter(),
            cursor: None,
            done: false,
        }
    }
}

impl Iterator for RefWalk<'_> {
    type Item = Result<RefEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buf.next() {
                return Some(Ok(entry));
            }
            if self.done {
                return None;
            }
            match self.store.scan(&self.list, self.cursor, self.batch) {
                Ok(page) => {
                    if page.len() < self.batch {
                        self.done = true;
                    }
                    let Some(last) = page.last() else {
                        return None;
                    };
                    self.cursor = Some(last.position);
                    self.buf = page.into_iter();
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    activity_id: String,
    last_updated_ms: i64,
}

#[derive(Debug, Default)]
struct RefList {
    /// Day partitions, created on first insert and dropped once empty.
    buckets: BTreeMap<BucketKey, BTreeMap<(i64, i64), Slot>>,
    index: HashMap<String, EntryPosition>,
}

impl RefList {
    fn take(&mut self, pos: EntryPosition) {
        if let Some(bucket) = self.buckets.get_mut(&pos.bucket) {
            bucket.remove(&(pos.created_at_ms, pos.seq));
            if bucket.is_empty() {
                self.buckets.remove(&pos.bucket);
            }
        }
    }

    fn entry_at(&self, list: &ListKey, pos: EntryPosition) -> Option<RefEntry> {
        let slot = self.buckets.get(&pos.bucket)?.get(&(pos.created_at_ms, pos.seq))?;
        Some(RefEntry {
            owner: list.owner.clone(),
            stream: list.stream,
            activity_id: slot.activity_id.clone(),
            last_updated_ms: slot.last_updated_ms,
            position: pos,
        })
    }
}

/// In-process store: an arena of day-bucketed partitions with one lock per list.
#[derive(Default)]
pub struct MemoryRefStore {
    lists: RwLock<BTreeMap<ListKey, Arc<Mutex<RefList>>>>,
    next_seq: AtomicI64,
}

impl MemoryRefStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, key: &ListKey, create: bool) -> Result<Option<Arc<Mutex<RefList>>>> {
        {
            let lists = self.lists.read().map_err(|_| anyhow!("list registry lock poisoned"))?;
            if let Some(l) = lists.get(key) {
                return Ok(Some(l.clone()));
            }
        }
        if !create {
            return Ok(None);
        }
        let mut lists = self.lists.write().map_err(|_| anyhow!("list registry lock poisoned"))?;
        Ok(Some(lists.entry(key.clone()).or_default().clone()))
    }
}

fn lock(list: &Mutex<RefList>) -> Result<std::sync::MutexGuard<'_, RefList>> {
    list.lock().map_err(|_| anyhow!("reference list lock poisoned"))
}

impl RefListStore for MemoryRefStore {
    fn upsert(&self, list: &ListKey, stamp: &ActivityStamp) -> Result<UpsertOutcome> {
        let Some(handle) = self.list(list, true)? else {
            return Err(anyhow!("list not created: {list}"));
        };
        let mut l = lock(&handle)?;
        if let Some(pos) = l.index.get(&stamp.id).copied() {
            let slot = l
                .buckets
                .get_mut(&pos.bucket)
                .and_then(|b| b.get_mut(&(pos.created_at_ms, pos.seq)))
                .ok_or_else(|| anyhow!("index points at missing slot: {list} {}", stamp.id))?;
            if slot.last_updated_ms == stamp.last_updated_ms {
                return Ok(UpsertOutcome::Unchanged);
            }
            slot.last_updated_ms = stamp.last_updated_ms;
            return Ok(UpsertOutcome::Refreshed);
        }
        let pos = EntryPosition {
            bucket: BucketKey::from_unix_ms(stamp.created_at_ms),
            created_at_ms: stamp.created_at_ms,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed) + 1,
        };
        l.buckets.entry(pos.bucket).or_default().insert(
            (pos.created_at_ms, pos.seq),
            Slot {
                activity_id: stamp.id.clone(),
                last_updated_ms: stamp.last_updated_ms,
            },
        );
        l.index.insert(stamp.id.clone(), pos);
        Ok(UpsertOutcome::Inserted)
    }

    fn remove(&self, list: &ListKey, activity_id: &str) -> Result<bool> {
        let Some(handle) = self.list(list, false)? else {
            return Ok(false);
        };
        let mut l = lock(&handle)?;
        let Some(pos) = l.index.remove(activity_id) else {
            return Ok(false);
        };
        l.take(pos);
        Ok(true)
    }

    fn prune(&self, entry: &RefEntry) -> Result<bool> {
        let Some(handle) = self.list(&entry.list(), false)? else {
            return Ok(false);
        };
        let mut l = lock(&handle)?;
        if l.index.get(&entry.activity_id) != Some(&entry.position) {
            return Ok(false);
        }
        l.index.remove(&entry.activity_id);
        l.take(entry.position);
        Ok(true)
    }

    fn get(&self, list: &ListKey, activity_id: &str) -> Result<Option<RefEntry>> {
        let Some(handle) = self.list(list, false)? else {
            return Ok(None);
        };
        let l = lock(&handle)?;
        Ok(l.index.get(activity_id).and_then(|pos| l.entry_at(list, *pos)))
    }

    fn scan(&self, list: &ListKey, after: Option<EntryPosition>, limit: usize) -> Result<Vec<RefEntry>> {
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        let Some(handle) = self.list(list, false)? else {
            return Ok(out);
        };
        let l = lock(&handle)?;
        let upper = after.map_or(Bound::Unbounded, |a| Bound::Included(a.bucket));
        for (bucket, slots) in l.buckets.range((Bound::Unbounded, upper)).rev() {
            let inner = match after {
                Some(a) if a.bucket == *bucket => Bound::Excluded((a.created_at_ms, a.seq)),
                _ => Bound::Unbounded,
            };
            for (&(created_at_ms, seq), slot) in slots.range((Bound::Unbounded, inner)).rev() {
                out.push(RefEntry {
                    owner: list.owner.clone(),
                    stream: list.stream,
                    activity_id: slot.activity_id.clone(),
                    last_updated_ms: slot.last_updated_ms,
                    position: EntryPosition {
                        bucket: *bucket,
                        created_at_ms,
                        seq,
                    },
                });
                if out.len() == limit {
                    return Ok(out);
                }
            }
        }
        Ok(out)
    }

    fn count(&self, list: &ListKey) -> Result<u64> {
        let Some(handle) = self.list(list, false)? else {
            return Ok(0);
        };
        let l = lock(&handle)?;
        Ok(l.index.len() as u64)
    }

    fn lists(&self, after: Option<&ListKey>, limit: usize) -> Result<Vec<ListKey>> {
        let lists = self.lists.read().map_err(|_| anyhow!("list registry lock poisoned"))?;
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        Ok(lists
            .range::<ListKey, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(k, _)| k.clone())
            .collect())
    }
}


#[cfg(test)]
mod tests {
    use super::conformance::*;
    use super::*;

    #[test]
    fn bucket_key_is_utc_day() {
        assert_eq!(BucketKey::from_unix_ms(0), BucketKey(0));
        assert_eq!(BucketKey::from_unix_ms(DAY - 1), BucketKey(0));
        assert_eq!(BucketKey::from_unix_ms(DAY), BucketKey(1));
        assert_eq!(BucketKey::from_unix_ms(-1), BucketKey(-1));
        assert_eq!(BucketKey(0).to_string(), "1970-01-01");
    }

    #[test]
    fn memory_upsert_is_idempotent() {
        upsert_is_idempotent(&MemoryRefStore::new());
    }

    #[test]
    fn memory_refresh_keeps_position() {
        refresh_keeps_position(&MemoryRefStore::new());
    }

    #[test]
    fn memory_remove_absent_is_noop() {
        remove_absent_is_noop(&MemoryRefStore::new());
    }

    #[test]
    fn memory_walks_newest_bucket_first() {
        walks_newest_bucket_first(&MemoryRefStore::new());
    }

    #[test]
    fn memory_backdated_entries_land_in_place() {
        backdated_entries_land_in_place(&MemoryRefStore::new());
    }

    #[test]
    fn memory_scan_resumes_after_cursor() {
        scan_resumes_after_cursor(&MemoryRefStore::new());
    }

    #[test]
    fn memory_prune_ignores_stale_entries() {
        prune_ignores_stale_entries(&MemoryRefStore::new());
    }

    #[test]
    fn memory_lists_enumerates_written_lists() {
        lists_enumerates_written_lists(&MemoryRefStore::new());
    }

    #[test]
    fn memory_drops_empty_buckets() {
        let store = MemoryRefStore::new();
        let list = ListKey {
            owner: IdentityKey("u".to_string()),
            stream: StreamType::Own,
        };
        store.upsert(&list, &stamp("a", DAY, 1)).unwrap();
        store.remove(&list, "a").unwrap();
        let handle = store.list(&list, false).unwrap().unwrap();
        assert!(handle.lock().unwrap().buckets.is_empty());
    }
}
