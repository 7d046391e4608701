//! Failure path for transactions.
//!
//! Rolling back runs blacklist, validlist propagation, lock removal and
//! node deletion strictly in that order: once the lock is gone another
//! transaction may take it, and it must already see the failed id as
//! blacklisted and the keys pointing at their prior valid versions.

use crate::blacklist::BlacklistCache;
use crate::error::Result;
use crate::lock::LockManager;
use crate::paths::{self, PathScheme};
use crate::store::Store;
use crate::txids::TransactionIdAllocator;
use crate::updated_keys::UpdatedKeyTracker;
use crate::{NO_VALID_TXID, TxId};
use coordstore::{CreateMode, Error};
use diagnostics::*;
use std::sync::Arc;

pub struct RollbackCoordinator {
    store: Arc<Store>,
    paths: PathScheme,
    blacklist: Arc<BlacklistCache>,
    txids: Arc<TransactionIdAllocator>,
    locks: Arc<LockManager>,
    tracker: Arc<UpdatedKeyTracker>,
}

impl RollbackCoordinator {
    pub fn new(
        store: Arc<Store>,
        paths: PathScheme,
        blacklist: Arc<BlacklistCache>,
        txids: Arc<TransactionIdAllocator>,
        locks: Arc<LockManager>,
        tracker: Arc<UpdatedKeyTracker>,
    ) -> Self {
        Self {
            store,
            paths,
            blacklist,
            txids,
            locks,
            tracker,
        }
    }

    /// Mark a live transaction as failed and undo its bookkeeping.
    ///
    /// Fails with `Expired`/`Invalid` when the transaction was already
    /// blacklisted or finished. `Ok(false)` means the transaction is
    /// blacklisted but its node could not be removed; a later GC pass
    /// retries.
    pub async fn notify_failed_transaction(&self, app: &str, txid: TxId) -> Result<bool> {
        _ = self.txids.check_transaction(app, txid).await?;

        let lock_path = self.locks.get_lock_path(app, txid).await?;
        let updated = self.tracker.updated_keys(app, txid).await?;

        let now = paths::encode_timestamp(chrono::Utc::now());
        match self
            .store
            .create_with_parents(
                &self.paths.blacklist_path(app, txid),
                now.as_bytes(),
                CreateMode::PERSISTENT,
            )
            .await
        {
            Ok(_) | Err(Error::NodeExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.blacklist.mark(app, txid).await;

        for key in &updated {
            // A failed transaction is never the valid version of anything
            let valid = if key.target_txid == txid {
                NO_VALID_TXID
            } else {
                key.target_txid
            };
            self.advance_valid_pointer(app, &key.entity_key, valid).await?;
        }

        let tx_path = self.paths.tx_path(app, txid);
        if let Some(lock_path) = &lock_path {
            _ = self.locks.delete_lock_if_owned(lock_path, &tx_path).await?;
        }

        if let Err(e) = self.store.delete_recursive(&tx_path).await {
            let error_str = e.to_string();
            warn!(
                "transaction {txid} of {app} blacklisted but not deleted: {error}",
                txid: txid,
                app: app,
                error: error_str
            );
            return Ok(false);
        }

        let keys = updated.len();
        let held_lock = lock_path.is_some();
        info!(
            "rolled back transaction {txid} of {app} ({keys} keys, lock held: {held_lock})",
            txid: txid,
            app: app,
            keys: keys,
            held_lock: held_lock
        );
        Ok(true)
    }

    /// The transaction whose version of `entity_key` readers should see when
    /// they were pointed at `target_txid`
    pub async fn get_valid_transaction_id(
        &self,
        app: &str,
        target_txid: TxId,
        entity_key: &str,
    ) -> Result<TxId> {
        if !self.blacklist.is_blacklisted(app, target_txid).await? {
            return Ok(target_txid);
        }
        let pointer = self
            .store
            .get_string_opt(&self.paths.validlist_path(app, entity_key))
            .await?;
        Ok(pointer
            .as_deref()
            .and_then(paths::decode_txid)
            .unwrap_or(NO_VALID_TXID))
    }

    /// Upsert a validlist pointer without ever moving it backwards. The
    /// write is conditional on the version read, so a concurrent rollback
    /// that moved the pointer further in between wins.
    async fn advance_valid_pointer(&self, app: &str, entity_key: &str, txid: TxId) -> Result<()> {
        let valid_path = self.paths.validlist_path(app, entity_key);
        let value = paths::encode_txid(txid);
        loop {
            match self
                .store
                .create_with_parents(&valid_path, value.as_bytes(), CreateMode::PERSISTENT)
                .await
            {
                Ok(_) => return Ok(()),
                Err(Error::NodeExists(_)) => {}
                Err(e) => return Err(e.into()),
            }

            let (current, stat) = match self.store.get_with_stat(&valid_path).await {
                Ok(found) => found,
                Err(Error::NoNode(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let current = paths::decode_txid(&String::from_utf8_lossy(&current));
            if current.is_some_and(|current| current >= txid) {
                return Ok(());
            }
            match self
                .store
                .set_if_version(&valid_path, value.as_bytes(), stat.version)
                .await
            {
                Ok(()) => return Ok(()),
                Err(Error::BadVersion(_) | Error::NoNode(_)) => {
                    debug!("validlist pointer {path} changed, retrying", path: valid_path.as_str());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
