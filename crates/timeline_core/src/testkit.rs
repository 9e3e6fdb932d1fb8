/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! In-memory collaborators with fault injection for unit tests.

use crate::collaborators::{
    ActivityContentStore, ActivityStamp, ConnectionGraph, IdentityDirectory, IdentityKey, IdentityRef, SpaceRoster,
};
use crate::ref_store::{EntryPosition, MemoryRefStore, RefEntry, RefListStore, UpsertOutcome};
use crate::stream_type::ListKey;
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

pub const PROVIDER: &str = "organization";

#[derive(Default)]
pub struct World {
    identities: Mutex<HashMap<IdentityRef, IdentityKey>>,
    activities: Mutex<HashMap<String, ActivityStamp>>,
    edges: Mutex<Vec<(IdentityRef, IdentityRef)>>,
    rosters: Mutex<HashMap<IdentityRef, Vec<IdentityRef>>>,
    clock: AtomicI64,
    pub graph_down: AtomicBool,
    pub content_down: AtomicBool,
}

impl World {
    pub fn new() -> Self {
        let w = Self::default();
        w.clock.store(1_700_000_000_000, Ordering::Relaxed);
        w
    }

    pub fn user(&self, name: &str) -> IdentityRef {
        let r = IdentityRef::new(PROVIDER, name);
        self.identities
            .lock()
            .unwrap()
            .entry(r.clone())
            .or_insert_with(|| IdentityKey(format!("key-{name}")));
        r
    }

    pub fn key(&self, name: &str) -> IdentityKey {
        IdentityKey(format!("key-{name}"))
    }

    pub fn forget(&self, who: &IdentityRef) {
        self.identities.lock().unwrap().remove(who);
    }

    /// Stores an activity one minute after the previous one.
    pub fn activity(&self, id: &str) -> ActivityStamp {
        let ts = self.clock.fetch_add(60_000, Ordering::Relaxed);
        let s = ActivityStamp {
            id: id.to_string(),
            created_at_ms: ts,
            last_updated_ms: ts,
        };
        self.activities.lock().unwrap().insert(id.to_string(), s.clone());
        s
    }

    pub fn edit(&self, id: &str) -> ActivityStamp {
        let ts = self.clock.fetch_add(60_000, Ordering::Relaxed);
        let mut g = self.activities.lock().unwrap();
        let s = g.get_mut(id).expect("edit of unknown activity");
        s.last_updated_ms = ts;
        s.clone()
    }

    pub fn purge(&self, id: &str) {
        self.activities.lock().unwrap().remove(id);
    }

    pub fn connect(&self, a: &IdentityRef, b: &IdentityRef) {
        self.edges.lock().unwrap().push((a.clone(), b.clone()));
    }

    pub fn disconnect(&self, a: &IdentityRef, b: &IdentityRef) {
        self.edges
            .lock()
            .unwrap()
            .retain(|(x, y)| !((x == a && y == b) || (x == b && y == a)));
    }

    pub fn join(&self, space: &IdentityRef, member: &IdentityRef) {
        self.rosters
            .lock()
            .unwrap()
            .entry(space.clone())
            .or_default()
            .push(member.clone());
    }

    pub fn leave(&self, space: &IdentityRef, member: &IdentityRef) {
        if let Some(m) = self.rosters.lock().unwrap().get_mut(space) {
            m.retain(|x| x != member);
        }
    }
}

impl ActivityContentStore for World {
    fn exists(&self, activity_id: &str) -> Result<bool> {
        Ok(self.get(activity_id)?.is_some())
    }

    fn get(&self, activity_id: &str) -> Result<Option<ActivityStamp>> {
        if self.content_down.load(Ordering::Relaxed) {
            return Err(anyhow!("content store down"));
        }
        Ok(self.activities.lock().unwrap().get(activity_id).cloned())
    }
}

impl ConnectionGraph for World {
    fn connections_of(&self, identity: &IdentityRef) -> Result<Vec<IdentityRef>> {
        if self.graph_down.load(Ordering::Relaxed) {
            return Err(anyhow!("graph down"));
        }
        let edges = self.edges.lock().unwrap();
        Ok(edges
            .iter()
            .filter_map(|(a, b)| {
                if a == identity {
                    Some(b.clone())
                } else if b == identity {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect())
    }
}

impl SpaceRoster for World {
    fn members_of(&self, space: &IdentityRef) -> Result<Vec<IdentityRef>> {
        Ok(self.rosters.lock().unwrap().get(space).cloned().unwrap_or_default())
    }
}

impl IdentityDirectory for World {
    fn resolve(&self, identity: &IdentityRef) -> Result<Option<IdentityKey>> {
        Ok(self.identities.lock().unwrap().get(identity).cloned())
    }
}

/// Memory store whose mutations fail for selected owners.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryRefStore,
    broken: Mutex<HashSet<IdentityKey>>,
}

impl FlakyStore {
    pub fn break_owner(&self, owner: IdentityKey) {
        self.broken.lock().unwrap().insert(owner);
    }

    fn check(&self, list: &ListKey) -> Result<()> {
        if self.broken.lock().unwrap().contains(&list.owner) {
            return Err(anyhow!("store unreachable for {list}"));
        }
        Ok(())
    }
}

impl RefListStore for FlakyStore {
    fn upsert(&self, list: &ListKey, stamp: &ActivityStamp) -> Result<UpsertOutcome> {
        self.check(list)?;
        self.inner.upsert(list, stamp)
    }

    fn remove(&self, list: &ListKey, activity_id: &str) -> Result<bool> {
        self.check(list)?;
        self.inner.remove(list, activity_id)
    }

    fn prune(&self, entry: &RefEntry) -> Result<bool> {
        self.check(&entry.list())?;
        self.inner.prune(entry)
    }

    fn get(&self, list: &ListKey, activity_id: &str) -> Result<Option<RefEntry>> {
        self.inner.get(list, activity_id)
    }

    fn scan(&self, list: &ListKey, after: Option<EntryPosition>, limit: usize) -> Result<Vec<RefEntry>> {
        self.inner.scan(list, after, limit)
    }

    fn count(&self, list: &ListKey) -> Result<u64> {
        self.inner.count(list)
    }

    fn lists(&self, after: Option<&ListKey>, limit: usize) -> Result<Vec<ListKey>> {
        self.inner.lists(after, limit)
    }
}
