/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::api::{self, ApiState};
use crate::config::TimelineConfig;
use crate::ref_store_sqlite::SqliteRefStore;
use crate::social_db::SocialDb;
use crate::storage_gc::start_storage_gc_worker;
use crate::timeline::{Timeline, TimelineDeps};
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);
static CORES: Mutex<BTreeMap<u64, RunningCore>> = Mutex::new(BTreeMap::new());

/// A service instance owning a thread with its own tokio runtime.
struct RunningCore {
    shutdown_tx: watch::Sender<bool>,
    thread: thread::JoinHandle<()>,
}

impl RunningCore {
    fn spawn(handle: u64, cfg: TimelineConfig) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let thread = thread::Builder::new()
            .name(format!("timeline-core-{handle}"))
            .spawn(move || {
                if let Err(e) = run_core(cfg, shutdown_rx) {
                    error!("timeline runtime {handle} failed: {e:#}");
                }
            })
            .context("spawn runtime thread")?;
        Ok(Self { shutdown_tx, thread })
    }

    /// Signals shutdown; the thread is reaped in the background.
    fn shutdown(self, handle: u64) {
        let _ = self.shutdown_tx.send(true);
        let thread = self.thread;
        thread::spawn(move || {
            if thread.join().is_err() {
                warn!("timeline runtime {handle} panicked");
            }
        });
    }
}

fn cores() -> Result<MutexGuard<'static, BTreeMap<u64, RunningCore>>> {
    CORES.lock().map_err(|_| anyhow!("runtime registry poisoned"))
}

/// Installs the global subscriber; later calls are no-ops.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()),
        )
        .try_init()
        .ok();
}

/// Starts a service instance and returns the handle that stops it.
pub fn start(cfg: TimelineConfig) -> Result<u64> {
    init_tracing();
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    let core = RunningCore::spawn(handle, cfg)?;
    cores()?.insert(handle, core);
    Ok(handle)
}

pub fn stop(handle: u64) -> Result<()> {
    let core = cores()?
        .remove(&handle)
        .with_context(|| format!("unknown runtime handle {handle}"))?;
    core.shutdown(handle);
    Ok(())
}

/// Opens the stores named by `cfg` and wires them into a [`Timeline`].
pub fn build_state(cfg: &TimelineConfig) -> Result<ApiState> {
    let db_path = cfg.db_path()?;
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("create data dir: {}", dir.display()))?;
    }
    info!("db: {}", db_path.display());

    let social = Arc::new(SocialDb::open(&db_path, cfg.busy_timeout())?);
    let store = Arc::new(SqliteRefStore::open(&db_path, cfg.busy_timeout())?);
    let timeline = Arc::new(Timeline::new(
        TimelineDeps {
            store,
            content: social.clone(),
            graph: social.clone(),
            roster: social.clone(),
            directory: social.clone(),
        },
        cfg.scan_batch(),
        cfg.max_page_limit(),
    ));
    Ok(ApiState {
        timeline,
        social,
        internal_token: cfg.internal_token.clone().unwrap_or_default().trim().to_string(),
        max_body_bytes: cfg.max_body_bytes(),
    })
}

fn run_core(cfg: TimelineConfig, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    rt.block_on(async move {
        let state = build_state(&cfg)?;

        if start_storage_gc_worker(cfg.gc.clone().unwrap_or_default(), state.timeline.clone(), shutdown_rx.clone()) {
            info!("storage gc enabled");
        }

        let router = api::router(state);
        let addr: SocketAddr = cfg.bind.parse().context("parse bind")?;
        let listener = tokio::net::TcpListener::bind(addr).await.context("bind")?;
        info!("timeline server http://{addr}");

        let (server_shutdown_tx, mut server_shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = server_shutdown_rx.changed().await;
            };
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(shutdown)
                .await
        });

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }
        let _ = server_shutdown_tx.send(true);
        let _ = server.await;
        info!("timeline server stopped");
        Ok::<(), anyhow::Error>(())
    })
}
