//! Per-transaction record of touched entity keys.

use crate::TxId;
use crate::error::{Result, TxError};
use crate::paths::{self, PathScheme, UpdatedKey};
use crate::store::Store;
use coordstore::{CreateMode, Error, path};
use std::sync::Arc;

pub struct UpdatedKeyTracker {
    store: Arc<Store>,
    paths: PathScheme,
}

impl UpdatedKeyTracker {
    pub fn new(store: Arc<Store>, paths: PathScheme) -> Self {
        Self { store, paths }
    }

    /// Record that `current_txid` modified `entity_key`, whose previously
    /// valid version belongs to `target_txid`.
    ///
    /// When the key already has a valid-transaction pointer, that shared
    /// pointer is overwritten (last write wins) instead of recording a
    /// per-transaction entry.
    pub async fn register_updated_key(
        &self,
        app: &str,
        current_txid: TxId,
        target_txid: TxId,
        entity_key: &str,
    ) -> Result<()> {
        let tx_path = self.paths.tx_path(app, current_txid);
        if !self.store.exists(&tx_path).await? {
            return Err(invalid(app, current_txid));
        }

        let valid_path = self.paths.validlist_path(app, entity_key);
        if self.store.exists(&valid_path).await? {
            match self
                .store
                .set(&valid_path, paths::encode_txid(target_txid).as_bytes())
                .await
            {
                Ok(()) => return Ok(()),
                // Pointer removed in between; fall back to a per-transaction entry
                Err(Error::NoNode(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let value = UpdatedKey {
            entity_key: entity_key.to_string(),
            target_txid,
        }
        .encode();
        match self
            .store
            .create(
                &self.paths.updated_key_prefix(app, current_txid),
                value.as_bytes(),
                CreateMode::SEQUENTIAL,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::NoNode(_)) => Err(invalid(app, current_txid)),
            Err(e) => Err(e.into()),
        }
    }

    /// Entity keys recorded for the transaction, in registration order
    pub async fn get_updated_key_list(&self, app: &str, txid: TxId) -> Result<Vec<String>> {
        Ok(self
            .updated_keys(app, txid)
            .await?
            .into_iter()
            .map(|uk| uk.entity_key)
            .collect())
    }

    /// Decoded updated-key entries for the transaction
    pub(crate) async fn updated_keys(&self, app: &str, txid: TxId) -> Result<Vec<UpdatedKey>> {
        let tx_path = self.paths.tx_path(app, txid);
        let names = match self.store.children(&tx_path, false).await {
            Ok(names) => names,
            Err(Error::NoNode(_)) => return Err(invalid(app, txid)),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for name in names
            .iter()
            .filter(|n| paths::parse_sequence(n, paths::UPDATED_KEY_PREFIX).is_some())
        {
            let Some(raw) = self.store.get_string_opt(&path::join(&tx_path, name)).await? else {
                continue;
            };
            match UpdatedKey::decode(&raw) {
                Some(uk) => keys.push(uk),
                None => {
                    return Err(TxError::unknown(format!(
                        "malformed updated key {name} of transaction {txid}: {raw}"
                    )));
                }
            }
        }
        Ok(keys)
    }
}

fn invalid(app: &str, txid: TxId) -> TxError {
    TxError::Invalid(format!("transaction {txid} of {app} does not exist"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::store::tests::connected_store;
    use coordstore::MemoryStore;

    #[tokio::test]
    async fn test_register_and_list() {
        let memory = MemoryStore::new();
        let (store, _session) = connected_store(&memory).await;
        let paths = PathScheme::new("/apps");
        let tracker = UpdatedKeyTracker::new(store.clone(), paths.clone());
        store.ensure_path(&paths.tx_path("a", 5)).await.unwrap();

        tracker.register_updated_key("a", 5, 3, "customer#42").await.unwrap();
        tracker.register_updated_key("a", 5, 0, "order/7").await.unwrap();

        assert_eq!(
            tracker.get_updated_key_list("a", 5).await.unwrap(),
            vec!["customer#42".to_string(), "order/7".to_string()]
        );
        assert_eq!(
            store
                .get_string("/apps/a/txids/tx0000000005/ukey0000000000")
                .await
                .unwrap(),
            "customer%2342/3"
        );
    }

    #[tokio::test]
    async fn test_existing_pointer_is_overwritten() {
        let memory = MemoryStore::new();
        let (store, _session) = connected_store(&memory).await;
        let paths = PathScheme::new("/apps");
        let tracker = UpdatedKeyTracker::new(store.clone(), paths.clone());
        store.ensure_path(&paths.tx_path("a", 5)).await.unwrap();
        store.upsert(&paths.validlist_path("a", "k"), b"2").await.unwrap();

        tracker.register_updated_key("a", 5, 4, "k").await.unwrap();
        assert_eq!(
            store.get_string(&paths.validlist_path("a", "k")).await.unwrap(),
            "4"
        );
        assert!(tracker.get_updated_key_list("a", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_transaction_is_invalid() {
        let memory = MemoryStore::new();
        let (store, _session) = connected_store(&memory).await;
        let tracker = UpdatedKeyTracker::new(store, PathScheme::new("/apps"));

        let err = tracker.register_updated_key("a", 8, 8, "k").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        let err = tracker.get_updated_key_list("a", 8).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }
}
