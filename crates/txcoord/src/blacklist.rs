//! In-memory mirror of each application's blacklisted transaction ids.
//!
//! An application's set is loaded on first use by listing its blacklist
//! directory with a child watch. When the watch fires, the event pump calls
//! back in here, the directory is listed again (re-arming the watch) and the
//! whole set is swapped. Sets are immutable once published so readers only
//! hold the lock for a lookup.
//!
//! Every refresh or eviction bumps a generation counter under the write
//! lock. A load publishes its listing only if the generation is unchanged
//! and no set was published meanwhile, so a slow first listing never
//! replaces a newer one.

use crate::TxId;
use crate::error::Result;
use crate::paths::PathScheme;
use crate::session::WatchListener;
use crate::store::Store;
use async_trait::async_trait;
use coordstore::{Error, StoreEvent};
use diagnostics::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

pub struct BlacklistCache {
    store: Arc<Store>,
    paths: PathScheme,
    apps: RwLock<HashMap<String, Arc<HashSet<TxId>>>>,
    // Only written with `apps` held for writing
    generation: AtomicU64,
}

impl BlacklistCache {
    pub fn new(store: Arc<Store>, paths: PathScheme) -> Self {
        Self {
            store,
            paths,
            apps: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn is_blacklisted(&self, app: &str, txid: TxId) -> Result<bool> {
        if let Some(set) = self.apps.read().await.get(app) {
            return Ok(set.contains(&txid));
        }
        let set = self.load(app).await?;
        Ok(set.contains(&txid))
    }

    /// Whether `app` currently has a cached set
    pub async fn is_cached(&self, app: &str) -> bool {
        self.apps.read().await.contains_key(app)
    }

    /// Record a blacklisting made by this process without waiting for the
    /// watch round-trip. Uncached applications read the store on first use.
    pub async fn mark(&self, app: &str, txid: TxId) {
        let mut apps = self.apps.write().await;
        if let Some(set) = apps.get_mut(app) {
            if !set.contains(&txid) {
                let mut updated = (**set).clone();
                _ = updated.insert(txid);
                *set = Arc::new(updated);
            }
        }
    }

    /// Forget every cached set; used when watches are lost with the session
    pub async fn clear(&self) {
        let mut apps = self.apps.write().await;
        apps.clear();
        _ = self.generation.fetch_add(1, Ordering::SeqCst);
    }

    async fn load(&self, app: &str) -> Result<Arc<HashSet<TxId>>> {
        let root = self.paths.blacklist_root(app);
        self.store.ensure_path(&root).await?;
        let started = self.generation.load(Ordering::SeqCst);
        let names = self.store.children(&root, true).await?;
        let set = Arc::new(parse_names(&names));

        let mut apps = self.apps.write().await;
        if self.generation.load(Ordering::SeqCst) != started {
            // A watch was handled while listing; whatever it left is newer
            debug!("discarding stale blacklist listing for {app}", app: app);
            return Ok(apps.get(app).cloned().unwrap_or(set));
        }
        let published = apps.entry(app.to_string()).or_insert(set);
        debug!("loaded {count} blacklisted transactions for {app}", count: published.len(), app: app);
        Ok(Arc::clone(published))
    }

    async fn publish(&self, app: &str, set: Option<Arc<HashSet<TxId>>>) {
        let mut apps = self.apps.write().await;
        _ = match set {
            Some(set) => apps.insert(app.to_string(), set),
            None => apps.remove(app),
        };
        _ = self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Re-read an application's blacklist after its watch fired. Does not
    /// wait for the connection: while disconnected the set is dropped and
    /// the next lookup loads it again.
    pub async fn refresh(&self, app: &str) -> Result<()> {
        let root = self.paths.blacklist_root(app);
        match self.store.children_now(&root, true).await {
            Ok(names) => {
                let set = Arc::new(parse_names(&names));
                debug!("refreshed blacklist for {app}: {count} entries", app: app, count: set.len());
                self.publish(app, Some(set)).await;
                Ok(())
            }
            Err(Error::NoNode(_)) => {
                self.publish(app, None).await;
                Ok(())
            }
            Err(e) => {
                // Without a re-armed watch the cached set would go stale
                self.publish(app, None).await;
                Err(e.into())
            }
        }
    }
}

fn parse_names(names: &[String]) -> HashSet<TxId> {
    names.iter().filter_map(|name| name.parse().ok()).collect()
}

#[async_trait]
impl WatchListener for BlacklistCache {
    async fn watch_fired(&self, event: &StoreEvent) {
        let Some(path) = event.path() else {
            return;
        };
        let Some(app) = self.paths.app_for_blacklist_root(path) else {
            return;
        };
        let result = match event {
            StoreEvent::NodeDeleted { .. } => {
                self.publish(&app, None).await;
                Ok(())
            }
            _ => self.refresh(&app).await,
        };
        if let Err(e) = result {
            let error_str = e.to_string();
            warn!("blacklist refresh for {app} failed: {error}", app: app, error: error_str);
        }
    }

    async fn session_expired(&self) {
        self.clear().await;
        info!("blacklist cache cleared after session expiry");
    }
}
