/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;
use timeline_core::config::{default_config_path, load_config};
use timeline_core::runtime;
use tokio::time::interval;
use tracing::{error, info, warn};

fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// `--config <path>`, else `TIMELINE_CONFIG`, else the platform default.
fn config_path() -> Result<PathBuf> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Some(i) = args.iter().position(|a| a == "--config") {
        return args.get(i + 1).map(PathBuf::from).context("--config requires a path");
    }
    match std::env::var("TIMELINE_CONFIG") {
        Ok(p) if !p.trim().is_empty() => Ok(PathBuf::from(p)),
        _ => default_config_path(),
    }
}

/// Keeps one running instance in step with the config file.
struct Supervisor {
    path: PathBuf,
    /// Runtime handle and the hash of the config it was started from.
    current: Option<(u64, u64)>,
    /// Hash of the last text that failed to parse or start.
    rejected: Option<u64>,
    reported_missing: bool,
}

impl Supervisor {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            current: None,
            rejected: None,
            reported_missing: false,
        }
    }

    fn read(&mut self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => {
                self.reported_missing = false;
                Some(text)
            }
            Err(e) => {
                if !self.reported_missing {
                    warn!("config unreadable: {} ({e})", self.path.display());
                    self.reported_missing = true;
                }
                None
            }
        }
    }

    /// Restarts the instance when the file holds a config not seen before.
    fn poll(&mut self) {
        let Some(text) = self.read() else {
            return;
        };
        let hash = hash_text(&text);
        if self.current.map(|(_, h)| h) == Some(hash) || self.rejected == Some(hash) {
            return;
        }
        let cfg = match load_config(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("invalid config: {e:#}");
                self.rejected = Some(hash);
                return;
            }
        };
        self.halt();
        match runtime::start(cfg) {
            Ok(handle) => {
                info!("timeline running (handle={handle})");
                self.current = Some((handle, hash));
                self.rejected = None;
            }
            Err(e) => {
                error!("timeline failed to start: {e:#}");
                self.rejected = Some(hash);
            }
        }
    }

    fn halt(&mut self) {
        if let Some((handle, _)) = self.current.take() {
            if let Err(e) = runtime::stop(handle) {
                warn!("stop handle {handle}: {e:#}");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    runtime::init_tracing();
    let path = config_path()?;
    info!("timeline core service, config {}", path.display());

    let mut supervisor = Supervisor::new(path);
    let mut ticks = interval(Duration::from_secs(2));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticks.tick() => supervisor.poll(),
        }
    }
    info!("shutdown requested");
    supervisor.halt();
    Ok(())
}
