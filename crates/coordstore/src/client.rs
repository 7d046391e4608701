use crate::error::Result;
use crate::event::StoreEvent;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreateMode {
    /// Append a store-assigned `%010d` sequence number to the requested name
    pub sequential: bool,
    /// Remove the node automatically when the creating session ends
    pub ephemeral: bool,
}

impl CreateMode {
    pub const PERSISTENT: CreateMode = CreateMode {
        sequential: false,
        ephemeral: false,
    };
    pub const SEQUENTIAL: CreateMode = CreateMode {
        sequential: true,
        ephemeral: false,
    };
    pub const EPHEMERAL: CreateMode = CreateMode {
        sequential: false,
        ephemeral: true,
    };
}

/// Node metadata returned alongside values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    /// Number of times the value has been set
    pub version: i64,
    /// Store-wide creation counter; a path that is deleted and created
    /// again gets a new one
    pub czxid: u64,
    /// Creation time in microseconds since the epoch
    pub ctime: i64,
    /// Last modification time in microseconds since the epoch
    pub mtime: i64,
    pub num_children: usize,
    /// Owning session for ephemeral nodes
    pub ephemeral_owner: Option<u64>,
}

/// Narrow contract of a hierarchical, strongly-consistent coordination store.
///
/// Every call is a single round-trip. Paths are absolute, `/`-separated and
/// carry no trailing slash. Watches are one-shot and delivered on the event
/// channel handed to `connect`.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Start (or restart after expiry) a session; state changes and watch
    /// events are pushed onto `events` from then on.
    async fn connect(&self, events: UnboundedSender<StoreEvent>) -> Result<()>;

    /// End the session, dropping its ephemeral nodes and watches
    async fn close(&self) -> Result<()>;

    /// Create a node, returning the actual path (which differs from `path`
    /// for sequential nodes). Fails with `NodeExists` or `NoNode` (parent missing).
    async fn create(&self, path: &str, value: &[u8], mode: CreateMode) -> Result<String>;

    /// Read a value; `watch` registers a one-shot data watch on the node
    async fn get(&self, path: &str, watch: bool) -> Result<(Vec<u8>, Stat)>;

    async fn set(&self, path: &str, value: &[u8]) -> Result<Stat>;

    /// Compare-and-set: write only while the node is still at `version`,
    /// failing with `BadVersion` otherwise
    async fn set_if_version(&self, path: &str, value: &[u8], version: i64) -> Result<Stat>;

    /// Delete a leaf node. Fails with `NotEmpty` when the node has children.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Delete a leaf node only if it is the incarnation created at `czxid`,
    /// failing with `BadVersion` when the path has been recreated since
    async fn delete_if_created(&self, path: &str, czxid: u64) -> Result<()>;

    /// List child names (not full paths), sorted; `watch` registers a
    /// one-shot child watch on the node
    async fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>>;

    async fn exists(&self, path: &str) -> Result<bool>;
}
