/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Write-time propagation of activity and relationship events into the
//! per-identity reference lists.
//!
//! The owner's own lists are the primary effect of an event: failures there
//! are returned to the caller. Lists of connections and space members are
//! secondary: a failure on one target is logged and the loop moves on, and
//! nothing already applied is rolled back.

use crate::collaborators::{
    ActivityContentStore, ActivityStamp, ConnectionGraph, IdentityDirectory, IdentityKey, IdentityRef, SpaceRoster,
};
use crate::error::{StreamError, StreamResult};
use crate::ref_store::{RefListStore, RefWalk, UpsertOutcome};
use crate::stream_type::{Audience, StreamType, StreamTypeExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    /// List mutations that changed something.
    pub applied: u64,
    /// Mutations that found the list already in the wanted state.
    pub unchanged: u64,
    /// Targets skipped because the identity no longer resolves.
    pub skipped_targets: u64,
    /// Targets or entries whose mutation failed and was left to lag.
    pub failed: u64,
}

impl From<FanoutReport> for timeline_protocol::FanoutReportDto {
    fn from(r: FanoutReport) -> Self {
        Self {
            applied: r.applied,
            unchanged: r.unchanged,
            skipped_targets: r.skipped_targets,
            failed: r.failed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Mutation<'a> {
    Upsert(&'a ActivityStamp),
    /// Restamp the entry only in lists that already hold it.
    Refresh(&'a ActivityStamp),
    /// The activity itself is gone: drop it from every list of the audience.
    Delete(&'a str),
    /// The relationship is gone: drop it from the audience's source list, and
    /// from FEED unless another source list of the same identity still holds it.
    Detach(&'a str),
}

pub struct FanoutEngine {
    store: Arc<dyn RefListStore>,
    content: Arc<dyn ActivityContentStore>,
    graph: Arc<dyn ConnectionGraph>,
    roster: Arc<dyn SpaceRoster>,
    directory: Arc<dyn IdentityDirectory>,
    scan_batch: usize,
}

impl FanoutEngine {
    pub fn new(
        store: Arc<dyn RefListStore>,
        content: Arc<dyn ActivityContentStore>,
        graph: Arc<dyn ConnectionGraph>,
        roster: Arc<dyn SpaceRoster>,
        directory: Arc<dyn IdentityDirectory>,
        scan_batch: usize,
    ) -> Self {
        Self {
            store,
            content,
            graph,
            roster,
            directory,
            scan_batch: scan_batch.max(1),
        }
    }

    /// Adds the activity to the owner's OWN and FEED lists, then to the FEED
    /// and CONNECTIONS lists of every current connection.
    pub fn on_activity_created(&self, owner: &IdentityRef, activity_id: &str) -> StreamResult<FanoutReport> {
        let stamp = self.stamp_of(activity_id)?;
        let owner_key = self.resolve_primary(owner)?;
        let mut report = FanoutReport::default();
        let m = Mutation::Upsert(&stamp);
        self.apply_primary(&owner_key, Audience::Author, m, &mut report)?;
        self.fan_to_connections(owner, &owner_key, m, &mut report);
        debug!("activity {activity_id} by {owner} fanned out: {report:?}");
        Ok(report)
    }

    /// Rewrites `last_updated` of an edited activity wherever the owner's
    /// current audience holds it, without moving entries. Lists that do not
    /// hold the activity are left alone.
    pub fn on_activity_updated(&self, owner: &IdentityRef, activity_id: &str) -> StreamResult<FanoutReport> {
        let stamp = self.stamp_of(activity_id)?;
        let owner_key = self.resolve_primary(owner)?;
        let mut report = FanoutReport::default();
        let m = Mutation::Refresh(&stamp);
        self.apply_primary(&owner_key, Audience::Author, m, &mut report)?;
        self.fan_to_connections(owner, &owner_key, m, &mut report);
        debug!("activity {activity_id} by {owner} restamped: {report:?}");
        Ok(report)
    }

    /// Removes the activity from the owner's lists and from the lists of the
    /// owner's current connections. The activity may already be gone from the
    /// content store.
    pub fn on_activity_deleted(&self, owner: &IdentityRef, activity_id: &str) -> StreamResult<FanoutReport> {
        let owner_key = self.resolve_primary(owner)?;
        let mut report = FanoutReport::default();
        let m = Mutation::Delete(activity_id);
        self.apply_primary(&owner_key, Audience::Author, m, &mut report)?;
        self.fan_to_connections(owner, &owner_key, m, &mut report);
        debug!("activity {activity_id} by {owner} retracted: {report:?}");
        Ok(report)
    }

    /// Makes each side's back-catalog visible to the other.
    pub fn on_connection_established(&self, a: &IdentityRef, b: &IdentityRef) -> StreamResult<FanoutReport> {
        self.relink(a, b, true)
    }

    pub fn on_connection_broken(&self, a: &IdentityRef, b: &IdentityRef) -> StreamResult<FanoutReport> {
        self.relink(a, b, false)
    }

    /// Adds an activity posted into `space` to the space's own lists and to
    /// the FEED and SPACES lists of its current members.
    pub fn on_space_activity_created(&self, space: &IdentityRef, activity_id: &str) -> StreamResult<FanoutReport> {
        let stamp = self.stamp_of(activity_id)?;
        let space_key = self.resolve_primary(space)?;
        let mut report = FanoutReport::default();
        let m = Mutation::Upsert(&stamp);
        self.apply_primary(&space_key, Audience::Author, m, &mut report)?;
        self.fan_to_members(space, &space_key, m, &mut report);
        debug!("space activity {activity_id} in {space} fanned out: {report:?}");
        Ok(report)
    }

    pub fn on_space_activity_updated(&self, space: &IdentityRef, activity_id: &str) -> StreamResult<FanoutReport> {
        let stamp = self.stamp_of(activity_id)?;
        let space_key = self.resolve_primary(space)?;
        let mut report = FanoutReport::default();
        let m = Mutation::Refresh(&stamp);
        self.apply_primary(&space_key, Audience::Author, m, &mut report)?;
        self.fan_to_members(space, &space_key, m, &mut report);
        debug!("space activity {activity_id} in {space} restamped: {report:?}");
        Ok(report)
    }

    pub fn on_space_activity_deleted(&self, space: &IdentityRef, activity_id: &str) -> StreamResult<FanoutReport> {
        let space_key = self.resolve_primary(space)?;
        let mut report = FanoutReport::default();
        let m = Mutation::Delete(activity_id);
        self.apply_primary(&space_key, Audience::Author, m, &mut report)?;
        self.fan_to_members(space, &space_key, m, &mut report);
        debug!("space activity {activity_id} in {space} retracted: {report:?}");
        Ok(report)
    }

    pub fn on_space_member_joined(&self, space: &IdentityRef, member: &IdentityRef) -> StreamResult<FanoutReport> {
        let space_key = self.resolve_primary(space)?;
        let member_key = self.resolve_primary(member)?;
        let mut report = FanoutReport::default();
        if space_key == member_key {
            return Ok(report);
        }
        self.replay_authored(&space_key, &member_key, Audience::SpaceMember, true, &mut report)?;
        debug!("{member} joined {space}: {report:?}");
        Ok(report)
    }

    pub fn on_space_member_left(&self, space: &IdentityRef, member: &IdentityRef) -> StreamResult<FanoutReport> {
        let space_key = self.resolve_primary(space)?;
        let member_key = self.resolve_primary(member)?;
        let mut report = FanoutReport::default();
        if space_key == member_key {
            return Ok(report);
        }
        self.replay_authored(&space_key, &member_key, Audience::SpaceMember, false, &mut report)?;
        debug!("{member} left {space}: {report:?}");
        Ok(report)
    }

    fn relink(&self, a: &IdentityRef, b: &IdentityRef, attach: bool) -> StreamResult<FanoutReport> {
        let ka = self.resolve_primary(a)?;
        let kb = self.resolve_primary(b)?;
        let mut report = FanoutReport::default();
        if ka == kb {
            return Ok(report);
        }
        self.replay_authored(&ka, &kb, Audience::Connection, attach, &mut report)?;
        self.replay_authored(&kb, &ka, Audience::Connection, attach, &mut report)?;
        debug!(
            "{} {a} <-> {b}: {report:?}",
            if attach { "connected" } else { "disconnected" }
        );
        Ok(report)
    }

    /// Streams `author`'s OWN list into `viewer`'s lists for `audience`.
    ///
    /// Entries carry their own creation time and freshness stamp, so the
    /// content store is not consulted; dangling ones are cleaned up on read.
    fn replay_authored(
        &self,
        author: &IdentityKey,
        viewer: &IdentityKey,
        audience: Audience,
        attach: bool,
        report: &mut FanoutReport,
    ) -> StreamResult<()> {
        let own = StreamType::Own.list_for(author);
        for entry in RefWalk::new(self.store.as_ref(), own, self.scan_batch) {
            let entry = entry.map_err(StreamError::StoreUnavailable)?;
            let stamp = ActivityStamp {
                id: entry.activity_id.clone(),
                created_at_ms: entry.position.created_at_ms,
                last_updated_ms: entry.last_updated_ms,
            };
            let m = if attach {
                Mutation::Upsert(&stamp)
            } else {
                Mutation::Detach(&entry.activity_id)
            };
            if let Err(e) = self.apply(viewer, audience, m, report) {
                warn!("fan-out of {} to {viewer} failed: {e:#}", entry.activity_id);
                report.failed += 1;
            }
        }
        Ok(())
    }

    fn fan_to_connections(&self, owner: &IdentityRef, owner_key: &IdentityKey, m: Mutation<'_>, report: &mut FanoutReport) {
        let targets = match self.graph.connections_of(owner) {
            Ok(v) => v,
            Err(e) => {
                warn!("fan-out of {owner} deferred: {}", StreamError::GraphUnavailable(e));
                report.failed += 1;
                return;
            }
        };
        self.fan_to(targets, owner_key, Audience::Connection, m, report);
    }

    fn fan_to_members(&self, space: &IdentityRef, space_key: &IdentityKey, m: Mutation<'_>, report: &mut FanoutReport) {
        let targets = match self.roster.members_of(space) {
            Ok(v) => v,
            Err(e) => {
                warn!("fan-out of {space} deferred: {}", StreamError::GraphUnavailable(e));
                report.failed += 1;
                return;
            }
        };
        self.fan_to(targets, space_key, Audience::SpaceMember, m, report);
    }

    fn fan_to(
        &self,
        targets: Vec<IdentityRef>,
        origin: &IdentityKey,
        audience: Audience,
        m: Mutation<'_>,
        report: &mut FanoutReport,
    ) {
        let mut seen = HashSet::new();
        seen.insert(origin.clone());
        for target in targets {
            let key = match self.directory.resolve(&target) {
                Ok(Some(k)) => k,
                Ok(None) => {
                    warn!("{}", StreamError::ReferenceTargetMissing(target.to_string()));
                    report.skipped_targets += 1;
                    continue;
                }
                Err(e) => {
                    warn!("resolve {target} failed: {e:#}");
                    report.failed += 1;
                    continue;
                }
            };
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Err(e) = self.apply(&key, audience, m, report) {
                warn!("fan-out to {target} failed: {e:#}");
                report.failed += 1;
            }
        }
    }

    fn apply_primary(
        &self,
        owner: &IdentityKey,
        audience: Audience,
        m: Mutation<'_>,
        report: &mut FanoutReport,
    ) -> StreamResult<()> {
        self.apply(owner, audience, m, report)
            .map_err(StreamError::StoreUnavailable)
    }

    fn apply(&self, owner: &IdentityKey, audience: Audience, m: Mutation<'_>, report: &mut FanoutReport) -> anyhow::Result<()> {
        match m {
            Mutation::Upsert(stamp) => {
                for stream in audience.streams() {
                    match self.store.upsert(&stream.list_for(owner), stamp)? {
                        UpsertOutcome::Inserted | UpsertOutcome::Refreshed => report.applied += 1,
                        UpsertOutcome::Unchanged => report.unchanged += 1,
                    }
                }
            }
            Mutation::Refresh(stamp) => {
                for stream in audience.streams() {
                    let list = stream.list_for(owner);
                    if self.store.get(&list, &stamp.id)?.is_none() {
                        report.unchanged += 1;
                        continue;
                    }
                    match self.store.upsert(&list, stamp)? {
                        UpsertOutcome::Inserted | UpsertOutcome::Refreshed => report.applied += 1,
                        UpsertOutcome::Unchanged => report.unchanged += 1,
                    }
                }
            }
            Mutation::Delete(id) => {
                for stream in audience.streams() {
                    count_removal(report, self.store.remove(&stream.list_for(owner), id)?);
                }
            }
            Mutation::Detach(id) => {
                count_removal(report, self.store.remove(&audience.source().list_for(owner), id)?);
                let mut kept = false;
                for other in audience.other_feed_sources() {
                    if self.store.get(&other.list_for(owner), id)?.is_some() {
                        kept = true;
                        break;
                    }
                }
                if kept {
                    report.unchanged += 1;
                } else {
                    count_removal(report, self.store.remove(&StreamType::Feed.list_for(owner), id)?);
                }
            }
        }
        Ok(())
    }

    fn resolve_primary(&self, identity: &IdentityRef) -> StreamResult<IdentityKey> {
        self.directory
            .resolve(identity)
            .map_err(StreamError::StoreUnavailable)?
            .ok_or_else(|| StreamError::ReferenceTargetMissing(identity.to_string()))
    }

    fn stamp_of(&self, activity_id: &str) -> StreamResult<ActivityStamp> {
        self.content
            .get(activity_id)
            .map_err(StreamError::ContentUnavailable)?
            .ok_or_else(|| StreamError::ActivityNotFound(activity_id.to_string()))
    }
}

fn count_removal(report: &mut FanoutReport, removed: bool) {
    if removed {
        report.applied += 1;
    } else {
        report.unchanged += 1;
    }
}
