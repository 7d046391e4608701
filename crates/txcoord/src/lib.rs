//! Txcoord - transaction coordination over a hierarchical coordination store
//!
//! Hands out transaction ids, serializes access to root entities with
//! per-key lock nodes, tracks failed ("blacklisted") transactions and the
//! last valid transaction of every touched key, and reclaims transactions
//! whose owners went away. All state lives in the coordination store, so
//! any number of processes may share one namespace.
//!
//! ```text
//! txid = get_transaction_id(app)
//! acquire_lock(app, txid, root_key)          Concurrent -> retry with a new txid
//! register_updated_key(app, txid, prev, key)
//! release_lock(app, txid)                    on success
//! notify_failed_transaction(app, txid)       on failure
//! ```

mod blacklist;
mod config;
mod coordinator;
mod error;
mod gc;
mod id_block;
mod lock;
mod rollback;
mod session;
mod store;
mod txids;
mod updated_keys;

pub mod paths;

pub use blacklist::BlacklistCache;
pub use config::CoordinatorConfig;
pub use coordinator::TransactionCoordinator;
pub use error::{ErrorKind, Result, TxError};
pub use gc::{GarbageCollector, GcOutcome, GcReport, SkipReason};
pub use id_block::{IdBlock, IdBlockAllocator};
pub use lock::LockManager;
pub use paths::PathScheme;
pub use rollback::RollbackCoordinator;
pub use session::{SessionManager, WatchListener};
pub use store::Store;
pub use txids::TransactionIdAllocator;
pub use updated_keys::UpdatedKeyTracker;

/// Transaction id; always greater than zero once allocated
pub type TxId = u64;

/// Returned by `get_valid_transaction_id` when no valid version is recorded
pub const NO_VALID_TXID: TxId = 0;
