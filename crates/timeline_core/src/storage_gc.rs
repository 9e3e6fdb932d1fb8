/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::stream_type::ListKey;
use crate::timeline::Timeline;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct GcConfig {
    /// Sweep period. The worker is not started when unset.
    pub interval_secs: Option<u64>,
    /// Lists visited per run; the next run resumes after the last one.
    pub lists_per_run: Option<u32>,
    /// Entries checked per list per run, newest first.
    pub entries_per_list: Option<u32>,
}

impl GcConfig {
    pub fn lists_per_run(&self) -> usize {
        self.lists_per_run.unwrap_or(500).max(1) as usize
    }

    pub fn entries_per_list(&self) -> usize {
        self.entries_per_list.unwrap_or(200).max(1) as usize
    }
}

/// Spawns the dangling-reference sweep if `cfg.interval_secs` is set.
/// Returns whether a worker was started.
pub fn start_storage_gc_worker(cfg: GcConfig, timeline: Arc<Timeline>, mut shutdown: watch::Receiver<bool>) -> bool {
    let Some(interval) = cfg.interval_secs else {
        return false;
    };
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(interval.max(30)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut cursor: Option<ListKey> = None;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                }
                _ = tick.tick() => {}
            }

            if *shutdown.borrow() {
                break;
            }

            match run_once(&cfg, &timeline, cursor.take()).await {
                Ok(next) => cursor = next,
                Err(e) => warn!("storage gc error: {e:#}"),
            }
        }
        debug!("storage gc stopped");
    });
    true
}

async fn run_once(cfg: &GcConfig, timeline: &Arc<Timeline>, after: Option<ListKey>) -> Result<Option<ListKey>> {
    let tl = timeline.clone();
    let (max_lists, per_list) = (cfg.lists_per_run(), cfg.entries_per_list());
    let pass = tokio::task::spawn_blocking(move || tl.sweep_lists(after.as_ref(), max_lists, per_list)).await??;
    if pass.totals.pruned > 0 {
        info!(
            lists = pass.lists,
            scanned = pass.totals.scanned,
            pruned = pass.totals.pruned,
            "gc pruned dangling references"
        );
    }
    Ok(pass.next)
}
