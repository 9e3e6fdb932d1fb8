/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::storage_gc::GcConfig;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TimelineConfig {
    pub bind: String,
    pub data_dir: Option<String>,
    /// Database file name inside the data dir, or an absolute path.
    pub db_file: Option<String>,
    /// Entries fetched per store round trip while walking a list.
    pub scan_batch: Option<usize>,
    pub max_page_limit: Option<u32>,
    pub busy_timeout_ms: Option<u64>,
    pub max_body_bytes: Option<usize>,
    /// Shared secret expected in `X-Timeline-Internal`; empty disables the check.
    #[serde(default)]
    pub internal_token: Option<String>,
    #[serde(default)]
    pub gc: Option<GcConfig>,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8788".to_string(),
            data_dir: None,
            db_file: None,
            scan_batch: None,
            max_page_limit: None,
            busy_timeout_ms: None,
            max_body_bytes: None,
            internal_token: None,
            gc: None,
        }
    }
}

impl TimelineConfig {
    pub fn scan_batch(&self) -> usize {
        self.scan_batch.unwrap_or(64).clamp(1, 10_000)
    }

    pub fn max_page_limit(&self) -> u32 {
        self.max_page_limit.unwrap_or(200).max(1)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms.unwrap_or(5_000))
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes.unwrap_or(1024 * 1024)
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match self.data_dir.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => default_data_dir(),
        }
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        let file = self
            .db_file
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("timeline.db");
        Ok(self.data_dir()?.join(file))
    }
}

pub fn load_config(text: &str) -> Result<TimelineConfig> {
    let cfg: TimelineConfig = serde_json::from_str(text).context("decode TimelineConfig")?;
    if cfg.bind.trim().is_empty() {
        anyhow::bail!("bind must not be empty");
    }
    Ok(cfg)
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("net", "timeline", "Timeline").context("unable to determine platform dirs")
}

pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("TIMELINE_DATA_DIR") {
        if !v.trim().is_empty() {
            return Ok(PathBuf::from(v));
        }
    }
    Ok(project_dirs()?.data_local_dir().to_path_buf())
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.json"))
}
