//! Background reclamation of abandoned transactions.
//!
//! Every poll round visits each application under the namespace root. A
//! pass over one application is throttled by its `gclasttime` marker and
//! guarded across processes by the ephemeral `gclock` node; inside the pass
//! every transaction older than the timeout is failed through the rollback
//! path.

use crate::error::{ErrorKind, Result};
use crate::paths::{self, PathScheme};
use crate::rollback::RollbackCoordinator;
use crate::store::Store;
use chrono::{DateTime, Utc};
use coordstore::{CreateMode, Error};
use diagnostics::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Result of one pass over one application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOutcome {
    Skipped(SkipReason),
    Collected(GcReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The previous pass was less than the GC interval ago
    Throttled,
    /// Another process holds the application's GC lock
    Locked,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub scanned: usize,
    pub rolled_back: usize,
    pub failed: usize,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct GarbageCollector {
    store: Arc<Store>,
    paths: PathScheme,
    rollback: Arc<RollbackCoordinator>,
    tx_timeout: Duration,
    gc_interval: Duration,
    poll_interval: Duration,
    running: Mutex<Option<Running>>,
}

impl GarbageCollector {
    pub fn new(
        store: Arc<Store>,
        paths: PathScheme,
        rollback: Arc<RollbackCoordinator>,
        tx_timeout: Duration,
        gc_interval: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            paths,
            rollback,
            tx_timeout,
            gc_interval,
            poll_interval,
            running: Mutex::new(None),
        }
    }

    /// Start the background loop; a no-op while it is already running
    pub async fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }
        let cancel = CancellationToken::new();
        let gc = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { gc.run(token).await });
        *running = Some(Running { cancel, handle });
        info!("garbage collector started");
    }

    /// Signal the loop to exit and wait for it. The current pass, if any, is
    /// allowed to finish; the poll sleep is interrupted.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            let error_str = e.to_string();
            warn!("garbage collector task ended abnormally: {error}", error: error_str);
        }
        info!("garbage collector stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    async fn run(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            if let Err(e) = self.run_once().await {
                let error_str = e.to_string();
                warn!("garbage collection round failed: {error}", error: error_str);
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// One round over every application; per-application failures are
    /// logged and do not stop the round
    pub async fn run_once(&self) -> Result<Vec<(String, GcOutcome)>> {
        let apps = match self.store.children(self.paths.apps_root(), false).await {
            Ok(apps) => apps,
            Err(Error::NoNode(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut outcomes = Vec::with_capacity(apps.len());
        for app in apps {
            match self.collect_app(&app).await {
                Ok(outcome) => outcomes.push((app, outcome)),
                Err(e) => {
                    let error_str = e.to_string();
                    warn!("garbage collection of {app} failed: {error}", app: app, error: error_str);
                }
            }
        }
        Ok(outcomes)
    }

    /// One throttled, lock-guarded pass over a single application
    pub async fn collect_app(&self, app: &str) -> Result<GcOutcome> {
        let now = Utc::now();
        if let Some(raw) = self.store.get_string_opt(&self.paths.gc_time_path(app)).await? {
            if let Some(last) = paths::decode_timestamp(&raw) {
                if elapsed(last, now) < self.gc_interval {
                    return Ok(GcOutcome::Skipped(SkipReason::Throttled));
                }
            }
        }

        let gc_lock = self.paths.gc_lock_path(app);
        match self
            .store
            .create(&gc_lock, paths::encode_timestamp(now).as_bytes(), CreateMode::EPHEMERAL)
            .await
        {
            Ok(_) => {}
            Err(Error::NodeExists(_)) => {
                debug!("garbage collection of {app} already in progress elsewhere", app: app);
                return Ok(GcOutcome::Skipped(SkipReason::Locked));
            }
            Err(e) => return Err(e.into()),
        }

        let scanned = self.scan(app, now).await;
        if scanned.is_ok() {
            let finished = paths::encode_timestamp(Utc::now());
            if let Err(e) = self.store.upsert(&self.paths.gc_time_path(app), finished.as_bytes()).await {
                let error_str = e.to_string();
                warn!("failed to record garbage collection time for {app}: {error}", app: app, error: error_str);
            }
        }
        if let Err(e) = self.store.delete_if_exists(&gc_lock).await {
            // Ephemeral; it goes away with the session at the latest
            let error_str = e.to_string();
            warn!("failed to release garbage collection lock of {app}: {error}", app: app, error: error_str);
        }

        let report = scanned?;
        info!(
            "garbage collected {app}: {scanned} scanned, {rolled_back} rolled back, {failed} failed",
            app: app,
            scanned: report.scanned,
            rolled_back: report.rolled_back,
            failed: report.failed
        );
        Ok(GcOutcome::Collected(report))
    }

    async fn scan(&self, app: &str, now: DateTime<Utc>) -> Result<GcReport> {
        let tx_root = self.paths.tx_root(app);
        let names = match self.store.children(&tx_root, false).await {
            Ok(names) => names,
            Err(Error::NoNode(_)) => return Ok(GcReport::default()),
            Err(e) => return Err(e.into()),
        };

        let mut report = GcReport::default();
        for txid in names.iter().filter_map(|name| paths::parse_tx_name(name)) {
            report.scanned += 1;
            let Some(raw) = self.store.get_string_opt(&self.paths.tx_path(app, txid)).await? else {
                continue;
            };
            let Some(created_at) = paths::decode_timestamp(&raw) else {
                warn!("transaction {txid} of {app} has unreadable creation time {raw}", txid: txid, app: app, raw: raw);
                report.failed += 1;
                continue;
            };
            if elapsed(created_at, now) < self.tx_timeout {
                continue;
            }

            match self.rollback.notify_failed_transaction(app, txid).await {
                Ok(true) => report.rolled_back += 1,
                Ok(false) => report.failed += 1,
                Err(e) if e.kind() == ErrorKind::Expired => {
                    // Blacklisted earlier but never deleted
                    match self.store.delete_recursive(&self.paths.tx_path(app, txid)).await {
                        Ok(()) => report.rolled_back += 1,
                        Err(e) => {
                            let error_str = e.to_string();
                            warn!("failed to delete expired transaction {txid} of {app}: {error}", txid: txid, app: app, error: error_str);
                            report.failed += 1;
                        }
                    }
                }
                // Finished on its own in the meantime
                Err(e) if e.kind() == ErrorKind::Invalid => {}
                Err(e) => {
                    let error_str = e.to_string();
                    warn!("failed to roll back stale transaction {txid} of {app}: {error}", txid: txid, app: app, error: error_str);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

/// Time from `since` to `now`; zero when the clock reads earlier than `since`
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
