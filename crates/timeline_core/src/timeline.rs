/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Entry point for the calling layers: event recording and stream reads.

use crate::collaborators::{ActivityContentStore, ConnectionGraph, IdentityDirectory, IdentityRef, SpaceRoster};
use crate::error::{StreamError, StreamResult};
use crate::fanout::{FanoutEngine, FanoutReport};
use crate::reader::{SelfHealingReader, SweepReport};
use crate::ref_store::RefListStore;
use crate::stream_type::{ListKey, StreamType, StreamTypeExt};
use std::sync::Arc;
use tracing::debug;

/// Collaborators a [`Timeline`] is built from.
#[derive(Clone)]
pub struct TimelineDeps {
    pub store: Arc<dyn RefListStore>,
    pub content: Arc<dyn ActivityContentStore>,
    pub graph: Arc<dyn ConnectionGraph>,
    pub roster: Arc<dyn SpaceRoster>,
    pub directory: Arc<dyn IdentityDirectory>,
}

pub struct Timeline {
    store: Arc<dyn RefListStore>,
    directory: Arc<dyn IdentityDirectory>,
    fanout: FanoutEngine,
    reader: SelfHealingReader,
    max_page_limit: u32,
}

/// Outcome of one bounded pass over many lists.
#[derive(Debug, Default, Clone)]
pub struct SweepPass {
    pub lists: u64,
    pub totals: SweepReport,
    /// Where the next pass resumes; `None` once the last list was visited.
    pub next: Option<ListKey>,
}

impl Timeline {
    pub fn new(deps: TimelineDeps, scan_batch: usize, max_page_limit: u32) -> Self {
        let fanout = FanoutEngine::new(
            deps.store.clone(),
            deps.content.clone(),
            deps.graph,
            deps.roster,
            deps.directory.clone(),
            scan_batch,
        );
        let reader = SelfHealingReader::new(deps.store.clone(), deps.content, scan_batch);
        Self {
            store: deps.store,
            directory: deps.directory,
            fanout,
            reader,
            max_page_limit: max_page_limit.max(1),
        }
    }

    pub fn record_activity_created(&self, owner: &IdentityRef, activity_id: &str) -> StreamResult<FanoutReport> {
        self.fanout.on_activity_created(owner, activity_id)
    }

    pub fn record_activity_updated(&self, owner: &IdentityRef, activity_id: &str) -> StreamResult<FanoutReport> {
        self.fanout.on_activity_updated(owner, activity_id)
    }

    pub fn record_activity_deleted(&self, owner: &IdentityRef, activity_id: &str) -> StreamResult<FanoutReport> {
        self.fanout.on_activity_deleted(owner, activity_id)
    }

    pub fn record_connection_established(&self, a: &IdentityRef, b: &IdentityRef) -> StreamResult<FanoutReport> {
        self.fanout.on_connection_established(a, b)
    }

    pub fn record_connection_broken(&self, a: &IdentityRef, b: &IdentityRef) -> StreamResult<FanoutReport> {
        self.fanout.on_connection_broken(a, b)
    }

    pub fn record_space_activity_created(&self, space: &IdentityRef, activity_id: &str) -> StreamResult<FanoutReport> {
        self.fanout.on_space_activity_created(space, activity_id)
    }

    pub fn record_space_activity_updated(&self, space: &IdentityRef, activity_id: &str) -> StreamResult<FanoutReport> {
        self.fanout.on_space_activity_updated(space, activity_id)
    }

    pub fn record_space_activity_deleted(&self, space: &IdentityRef, activity_id: &str) -> StreamResult<FanoutReport> {
        self.fanout.on_space_activity_deleted(space, activity_id)
    }

    pub fn record_space_member_joined(&self, space: &IdentityRef, member: &IdentityRef) -> StreamResult<FanoutReport> {
        self.fanout.on_space_member_joined(space, member)
    }

    pub fn record_space_member_left(&self, space: &IdentityRef, member: &IdentityRef) -> StreamResult<FanoutReport> {
        self.fanout.on_space_member_left(space, member)
    }

    /// Live activity ids of `identity`'s `stream`, newest first.
    ///
    /// `limit` is capped at the configured maximum. An identity that does not
    /// resolve has no lists, so its streams read as empty.
    pub fn page(&self, identity: &IdentityRef, stream: StreamType, offset: u32, limit: u32) -> StreamResult<Vec<String>> {
        let Some(list) = self.list_of(identity, stream)? else {
            debug!("page of unknown identity {identity}");
            return Ok(Vec::new());
        };
        let limit = limit.min(self.max_page_limit);
        self.reader.page(&list, offset as usize, limit as usize)
    }

    pub fn feed(&self, identity: &IdentityRef, offset: u32, limit: u32) -> StreamResult<Vec<String>> {
        self.page(identity, StreamType::Feed, offset, limit)
    }

    pub fn connections_stream(&self, identity: &IdentityRef, offset: u32, limit: u32) -> StreamResult<Vec<String>> {
        self.page(identity, StreamType::Connections, offset, limit)
    }

    pub fn spaces_stream(&self, identity: &IdentityRef, offset: u32, limit: u32) -> StreamResult<Vec<String>> {
        self.page(identity, StreamType::Spaces, offset, limit)
    }

    pub fn my_activities(&self, identity: &IdentityRef, offset: u32, limit: u32) -> StreamResult<Vec<String>> {
        self.page(identity, StreamType::Own, offset, limit)
    }

    /// Stored entries of the list, including dangling ones not yet pruned.
    pub fn count(&self, identity: &IdentityRef, stream: StreamType) -> StreamResult<u64> {
        match self.list_of(identity, stream)? {
            Some(list) => self.store.count(&list).map_err(StreamError::StoreUnavailable),
            None => Ok(0),
        }
    }

    /// Visits up to `max_lists` lists after `after`, sweeping at most
    /// `entries_per_list` entries of each.
    pub fn sweep_lists(&self, after: Option<&ListKey>, max_lists: usize, entries_per_list: usize) -> StreamResult<SweepPass> {
        let lists = self
            .store
            .lists(after, max_lists)
            .map_err(StreamError::StoreUnavailable)?;
        let mut pass = SweepPass::default();
        for list in &lists {
            let r = self.reader.sweep(list, entries_per_list)?;
            pass.lists += 1;
            pass.totals.scanned += r.scanned;
            pass.totals.pruned += r.pruned;
        }
        if lists.len() == max_lists {
            pass.next = lists.last().cloned();
        }
        Ok(pass)
    }

    pub fn health_check(&self) -> StreamResult<()> {
        self.store.health_check().map_err(StreamError::StoreUnavailable)
    }

    fn list_of(&self, identity: &IdentityRef, stream: StreamType) -> StreamResult<Option<ListKey>> {
        let key = self
            .directory
            .resolve(identity)
            .map_err(StreamError::StoreUnavailable)?;
        Ok(key.map(|k| stream.list_for(&k)))
    }
}
