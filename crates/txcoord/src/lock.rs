//! Root-entity locks.
//!
//! A lock is a node under `locks/` named by the quoted root key and valued
//! with the owning transaction's path; atomic create is the only mutual
//! exclusion primitive. The owner records the lock in its `lockpath` child
//! so release and rollback can find it. A transaction holds at most one
//! root-entity lock over its whole life.

use crate::TxId;
use crate::error::{Result, TxError};
use crate::paths::PathScheme;
use crate::store::Store;
use crate::txids::TransactionIdAllocator;
use coordstore::{CreateMode, Error};
use diagnostics::*;
use std::sync::Arc;

pub struct LockManager {
    store: Arc<Store>,
    paths: PathScheme,
    txids: Arc<TransactionIdAllocator>,
}

impl LockManager {
    pub fn new(store: Arc<Store>, paths: PathScheme, txids: Arc<TransactionIdAllocator>) -> Self {
        Self { store, paths, txids }
    }

    /// The lock path recorded by the transaction, if it holds one
    pub async fn get_lock_path(&self, app: &str, txid: TxId) -> Result<Option<String>> {
        Ok(self
            .store
            .get_string_opt(&self.paths.lockpath_path(app, txid))
            .await?)
    }

    pub async fn acquire_lock(&self, app: &str, txid: TxId, root_key: &str) -> Result<bool> {
        let lock_path = self.paths.lock_path(app, root_key);

        if let Some(held) = self.get_lock_path(app, txid).await? {
            if held == lock_path {
                return Ok(true);
            }
            return Err(TxError::DifferentRootKey(format!(
                "transaction {txid} already holds {held}, cannot lock {lock_path}"
            )));
        }

        _ = self.txids.check_transaction(app, txid).await?;

        let tx_path = self.paths.tx_path(app, txid);
        match self
            .store
            .create_with_parents(&lock_path, tx_path.as_bytes(), CreateMode::PERSISTENT)
            .await
        {
            Ok(_) => {}
            Err(Error::NodeExists(_)) => {
                debug!("lock {lock_path} contended by transaction {txid}", lock_path: lock_path, txid: txid);
                return Err(TxError::Concurrent(format!(
                    "{root_key} is locked by another transaction"
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let recorded = self
            .store
            .create(
                &self.paths.lockpath_path(app, txid),
                lock_path.as_bytes(),
                CreateMode::PERSISTENT,
            )
            .await;
        match recorded {
            Ok(_) => {
                debug!("transaction {txid} acquired {lock_path}", txid: txid, lock_path: lock_path);
                Ok(true)
            }
            Err(Error::NoNode(_)) => {
                // The transaction vanished after the check; give the lock back
                _ = self.delete_lock_if_owned(&lock_path, &tx_path).await?;
                Err(TxError::Invalid(format!(
                    "transaction {txid} of {app} disappeared while locking"
                )))
            }
            Err(Error::NodeExists(_)) => {
                // A concurrent acquire within the same transaction won
                match self.get_lock_path(app, txid).await? {
                    Some(held) if held == lock_path => Ok(true),
                    Some(held) => {
                        _ = self.delete_lock_if_owned(&lock_path, &tx_path).await?;
                        Err(TxError::DifferentRootKey(format!(
                            "transaction {txid} already holds {held}"
                        )))
                    }
                    None => Err(TxError::Invalid(format!(
                        "transaction {txid} of {app} disappeared while locking"
                    ))),
                }
            }
            Err(e) => {
                _ = self.delete_lock_if_owned(&lock_path, &tx_path).await?;
                Err(e.into())
            }
        }
    }

    /// Release the transaction's lock (if any) and delete its bookkeeping.
    ///
    /// Returns whether a lock had been held. Releasing an already finished
    /// transaction is not an error.
    pub async fn release_lock(&self, app: &str, txid: TxId, root_key: Option<&str>) -> Result<bool> {
        let held = self.get_lock_path(app, txid).await?;
        let tx_path = self.paths.tx_path(app, txid);

        if let (Some(key), Some(held)) = (root_key, held.as_deref()) {
            let expected = self.paths.lock_path(app, key);
            if held != expected {
                return Err(TxError::DifferentRootKey(format!(
                    "transaction {txid} holds {held}, not {expected}"
                )));
            }
        }

        if let Some(lock_path) = &held {
            _ = self.delete_lock_if_owned(lock_path, &tx_path).await?;
        }
        self.store.delete_recursive(&tx_path).await?;

        debug!("released transaction {txid} of {app}", txid: txid, app: app);
        Ok(held.is_some())
    }

    /// Delete a lock node only while it still names `owner`; a lock that is
    /// already gone (or was re-acquired by someone else) is left alone. The
    /// delete is pinned to the incarnation that was read, so a lock taken
    /// over between the read and the delete survives.
    pub(crate) async fn delete_lock_if_owned(&self, lock_path: &str, owner: &str) -> Result<bool> {
        let (value, stat) = match self.store.get_with_stat(lock_path).await {
            Ok(found) => found,
            Err(Error::NoNode(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if String::from_utf8_lossy(&value) != owner {
            return Ok(false);
        }
        match self.store.delete_if_created(lock_path, stat.czxid).await {
            Ok(()) => Ok(true),
            Err(Error::NoNode(_) | Error::BadVersion(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
