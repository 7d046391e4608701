//! Transaction id allocation and liveness checks.

use crate::TxId;
use crate::blacklist::BlacklistCache;
use crate::error::{Result, TxError};
use crate::paths::{self, PathScheme};
use crate::store::Store;
use coordstore::CreateMode;
use diagnostics::*;
use std::sync::Arc;

pub struct TransactionIdAllocator {
    store: Arc<Store>,
    paths: PathScheme,
    blacklist: Arc<BlacklistCache>,
}

impl TransactionIdAllocator {
    pub fn new(store: Arc<Store>, paths: PathScheme, blacklist: Arc<BlacklistCache>) -> Self {
        Self {
            store,
            paths,
            blacklist,
        }
    }

    /// Allocate a new transaction: a sequential `tx` node under the
    /// application's transaction root, valued with its creation time.
    ///
    /// Sequence 0 is reserved (it doubles as "no valid transaction"), so a
    /// node that lands on it is deleted and the allocation repeated.
    pub async fn get_transaction_id(&self, app: &str) -> Result<TxId> {
        let prefix = self.paths.tx_sequence_prefix(app);
        loop {
            let now = paths::encode_timestamp(chrono::Utc::now());
            let created = self
                .store
                .create_with_parents(&prefix, now.as_bytes(), CreateMode::SEQUENTIAL)
                .await?;
            let name = coordstore::path::basename(&created);
            let txid = paths::parse_tx_name(name).ok_or_else(|| {
                TxError::unknown(format!("unexpected transaction node name: {created}"))
            })?;

            if txid == 0 {
                debug!("discarding reserved transaction id 0 for {app}", app: app);
                _ = self.store.delete_if_exists(&created).await?;
                continue;
            }

            debug!("allocated transaction {txid} for {app}", txid: txid, app: app);
            return Ok(txid);
        }
    }

    /// Whether the transaction's bookkeeping node still exists
    pub async fn transaction_exists(&self, app: &str, txid: TxId) -> Result<bool> {
        Ok(self.store.exists(&self.paths.tx_path(app, txid)).await?)
    }

    /// Succeeds only for a live transaction: fails with `Expired` when it is
    /// blacklisted and `Invalid` when its node no longer exists
    pub async fn check_transaction(&self, app: &str, txid: TxId) -> Result<bool> {
        if self.blacklist.is_blacklisted(app, txid).await? {
            return Err(TxError::Expired(format!(
                "transaction {txid} of {app} is blacklisted"
            )));
        }
        if !self.transaction_exists(app, txid).await? {
            return Err(TxError::Invalid(format!(
                "transaction {txid} of {app} does not exist"
            )));
        }
        Ok(true)
    }
}
