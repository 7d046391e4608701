//! Coarse-grained entity id reservation.
//!
//! Each reservation creates and immediately deletes a sequential node under
//! `ids/<key>/`; the store-assigned sequence number times the block size is
//! the first id of a block nobody else will ever receive.

use crate::error::{Result, TxError};
use crate::paths::{self, PathScheme};
use crate::store::Store;
use coordstore::{CreateMode, path};
use diagnostics::*;
use std::ops::Range;
use std::sync::Arc;

/// Half-open range `[start, start + length)` of ids reserved for the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdBlock {
    pub start: u64,
    pub length: u64,
}

impl IdBlock {
    #[must_use]
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    #[must_use]
    pub fn range(&self) -> Range<u64> {
        self.start..self.end()
    }
}

pub struct IdBlockAllocator {
    store: Arc<Store>,
    paths: PathScheme,
    block_size: u64,
}

impl IdBlockAllocator {
    pub fn new(store: Arc<Store>, paths: PathScheme, block_size: u64) -> Self {
        Self {
            store,
            paths,
            block_size,
        }
    }

    /// Reserve the next block for `key`, or for the application-wide
    /// counter when `key` is `None`
    pub async fn generate_id_block(&self, app: &str, key: Option<&str>) -> Result<IdBlock> {
        let key = key.unwrap_or(paths::GLOBAL_ID_KEY);
        let prefix = self.paths.id_sequence_prefix(app, key);
        loop {
            let created = self
                .store
                .create_with_parents(&prefix, b"", CreateMode::SEQUENTIAL)
                .await?;
            _ = self.store.delete_if_exists(&created).await?;

            let sequence = paths::parse_sequence(path::basename(&created), paths::ID_PREFIX)
                .ok_or_else(|| TxError::unknown(format!("unexpected id node name: {created}")))?;
            let start = sequence.checked_mul(self.block_size).ok_or_else(|| {
                TxError::unknown(format!("id space exhausted for {key} of {app}"))
            })?;
            if start == 0 {
                continue;
            }

            debug!("reserved ids from {start} for {key} of {app}", start: start, key: key, app: app);
            return Ok(IdBlock {
                start,
                length: self.block_size,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::connected_store;
    use coordstore::MemoryStore;

    #[tokio::test]
    async fn test_blocks_skip_zero_and_are_disjoint() {
        let memory = MemoryStore::new();
        let (store, _session) = connected_store(&memory).await;
        let ids = IdBlockAllocator::new(store.clone(), PathScheme::new("/apps"), 10);

        let first = ids.generate_id_block("a", None).await.unwrap();
        assert_eq!(first, IdBlock { start: 10, length: 10 });
        let second = ids.generate_id_block("a", None).await.unwrap();
        assert_eq!(second.range(), 20..30);

        // Counter nodes never linger
        assert!(store.children("/apps/a/ids/__global__", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keys_have_independent_counters() {
        let memory = MemoryStore::new();
        let (store, _session) = connected_store(&memory).await;
        let ids = IdBlockAllocator::new(store, PathScheme::new("/apps"), 100);

        assert_eq!(ids.generate_id_block("a", Some("Kind/x")).await.unwrap().start, 100);
        assert_eq!(ids.generate_id_block("a", None).await.unwrap().start, 100);
        assert_eq!(ids.generate_id_block("a", Some("Kind/x")).await.unwrap().start, 200);
    }
}
