//! Service assembly: one coordinator per process, owning the session and
//! every component built on it.

use crate::blacklist::BlacklistCache;
use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::gc::{GarbageCollector, GcOutcome};
use crate::id_block::{IdBlock, IdBlockAllocator};
use crate::lock::LockManager;
use crate::paths::PathScheme;
use crate::rollback::RollbackCoordinator;
use crate::session::{SessionManager, WatchListener};
use crate::store::Store;
use crate::txids::TransactionIdAllocator;
use crate::updated_keys::UpdatedKeyTracker;
use crate::TxId;
use coordstore::{CoordinationClient, DumpNode};
use diagnostics::*;
use std::sync::Arc;

pub struct TransactionCoordinator {
    config: CoordinatorConfig,
    session: Arc<SessionManager>,
    store: Arc<Store>,
    blacklist: Arc<BlacklistCache>,
    txids: Arc<TransactionIdAllocator>,
    locks: Arc<LockManager>,
    tracker: Arc<UpdatedKeyTracker>,
    rollback: Arc<RollbackCoordinator>,
    id_blocks: IdBlockAllocator,
    gc: Arc<GarbageCollector>,
}

impl TransactionCoordinator {
    /// Wire up every component around `client`. Nothing touches the store
    /// until `connect`.
    pub fn new(client: Arc<dyn CoordinationClient>, config: CoordinatorConfig) -> Self {
        let paths = PathScheme::new(config.root_path.clone());
        let session = Arc::new(SessionManager::new(client));
        let store = Arc::new(Store::new(
            Arc::clone(&session),
            config.connect_timeout(),
            config.max_create_attempts,
        ));
        let blacklist = Arc::new(BlacklistCache::new(Arc::clone(&store), paths.clone()));
        let txids = Arc::new(TransactionIdAllocator::new(
            Arc::clone(&store),
            paths.clone(),
            Arc::clone(&blacklist),
        ));
        let locks = Arc::new(LockManager::new(
            Arc::clone(&store),
            paths.clone(),
            Arc::clone(&txids),
        ));
        let tracker = Arc::new(UpdatedKeyTracker::new(Arc::clone(&store), paths.clone()));
        let rollback = Arc::new(RollbackCoordinator::new(
            Arc::clone(&store),
            paths.clone(),
            Arc::clone(&blacklist),
            Arc::clone(&txids),
            Arc::clone(&locks),
            Arc::clone(&tracker),
        ));
        let id_blocks = IdBlockAllocator::new(Arc::clone(&store), paths.clone(), config.id_block_size);
        let gc = Arc::new(GarbageCollector::new(
            Arc::clone(&store),
            paths,
            Arc::clone(&rollback),
            config.tx_timeout(),
            config.gc_interval(),
            config.gc_poll_interval(),
        ));

        Self {
            config,
            session,
            store,
            blacklist,
            txids,
            locks,
            tracker,
            rollback,
            id_blocks,
            gc,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Open the session, route watch events to the blacklist cache and wait
    /// (bounded by `connect_timeout`) for the first connection
    pub async fn connect(&self) -> Result<()> {
        let root_path = self.config.root_path.as_str();
        info!("connecting transaction coordinator at {root_path}", root_path: root_path);
        let listener: Arc<dyn WatchListener> = self.blacklist.clone();
        self.session.connect(listener).await?;
        self.session
            .wait_for_connection(self.config.connect_timeout())
            .await
    }

    /// Stop garbage collection and end the session
    pub async fn close(&self) -> Result<()> {
        self.gc.stop().await;
        self.session.close().await
    }

    pub async fn start_gc(&self) {
        self.gc.start().await;
    }

    pub async fn stop_gc(&self) {
        self.gc.stop().await;
    }

    /// A single garbage collection round over every application
    pub async fn run_gc_once(&self) -> Result<Vec<(String, GcOutcome)>> {
        self.gc.run_once().await
    }

    pub async fn get_transaction_id(&self, app: &str) -> Result<TxId> {
        self.txids.get_transaction_id(app).await
    }

    pub async fn check_transaction(&self, app: &str, txid: TxId) -> Result<bool> {
        self.txids.check_transaction(app, txid).await
    }

    pub async fn transaction_exists(&self, app: &str, txid: TxId) -> Result<bool> {
        self.txids.transaction_exists(app, txid).await
    }

    pub async fn is_blacklisted(&self, app: &str, txid: TxId) -> Result<bool> {
        self.blacklist.is_blacklisted(app, txid).await
    }

    pub async fn acquire_lock(&self, app: &str, txid: TxId, root_key: &str) -> Result<bool> {
        self.locks.acquire_lock(app, txid, root_key).await
    }

    pub async fn release_lock(&self, app: &str, txid: TxId, root_key: Option<&str>) -> Result<bool> {
        self.locks.release_lock(app, txid, root_key).await
    }

    pub async fn get_lock_path(&self, app: &str, txid: TxId) -> Result<Option<String>> {
        self.locks.get_lock_path(app, txid).await
    }

    pub async fn register_updated_key(
        &self,
        app: &str,
        current_txid: TxId,
        target_txid: TxId,
        entity_key: &str,
    ) -> Result<()> {
        self.tracker
            .register_updated_key(app, current_txid, target_txid, entity_key)
            .await
    }

    pub async fn get_updated_key_list(&self, app: &str, txid: TxId) -> Result<Vec<String>> {
        self.tracker.get_updated_key_list(app, txid).await
    }

    pub async fn notify_failed_transaction(&self, app: &str, txid: TxId) -> Result<bool> {
        self.rollback.notify_failed_transaction(app, txid).await
    }

    pub async fn get_valid_transaction_id(
        &self,
        app: &str,
        target_txid: TxId,
        entity_key: &str,
    ) -> Result<TxId> {
        self.rollback
            .get_valid_transaction_id(app, target_txid, entity_key)
            .await
    }

    pub async fn generate_id_block(&self, app: &str, key: Option<&str>) -> Result<IdBlock> {
        self.id_blocks.generate_id_block(app, key).await
    }

    /// Render the store subtree under `path` (the namespace root when `None`)
    pub async fn dump_tree(&self, path: Option<&str>) -> Result<DumpNode> {
        let root = path.unwrap_or(self.config.root_path.as_str());
        self.session
            .wait_for_connection(self.config.connect_timeout())
            .await?;
        Ok(coordstore::dump_tree(self.store.session().client(), root).await?)
    }
}
