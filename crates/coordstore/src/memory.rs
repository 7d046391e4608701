//! In-memory coordination store
//!
//! `MemoryStore` is the shared "server": a tree of nodes guarded by a single
//! mutex. Each `MemorySession` is one client session against it, with its own
//! event channel, ephemeral nodes and watches. Several sessions on one store
//! behave like several processes sharing a real ensemble, which is what the
//! transaction tests need.
//!
//! Sessions also expose fault injection (`disconnect`, `reconnect`, `expire`)
//! so connection-loss paths can be exercised deterministically.

use crate::client::{CoordinationClient, CreateMode, Stat};
use crate::error::{Error, Result};
use crate::event::{SessionState, StoreEvent};
use crate::path;
use async_trait::async_trait;
use diagnostics::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone)]
struct Znode {
    value: Vec<u8>,
    version: i64,
    czxid: u64,
    ctime: i64,
    mtime: i64,
    ephemeral_owner: Option<u64>,
    // Counter for sequential children; the first one gets 0
    next_sequence: u64,
}

impl Znode {
    fn new(value: &[u8], czxid: u64, ephemeral_owner: Option<u64>) -> Self {
        let now = chrono::Utc::now().timestamp_micros();
        Self {
            value: value.to_vec(),
            version: 0,
            czxid,
            ctime: now,
            mtime: now,
            ephemeral_owner,
            next_sequence: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Idle,
    Connected,
    Disconnected,
    Expired,
    Closed,
}

struct SessionSlot {
    status: Status,
    events: Option<UnboundedSender<StoreEvent>>,
}

struct State {
    nodes: BTreeMap<String, Znode>,
    sessions: HashMap<u64, SessionSlot>,
    next_session_id: u64,
    // Bumped on every create
    next_czxid: u64,
    // path -> sessions waiting for a one-shot notification
    child_watches: HashMap<String, HashSet<u64>>,
    data_watches: HashMap<String, HashSet<u64>>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::from([("/".to_string(), Znode::new(b"", 0, None))]),
            sessions: HashMap::new(),
            next_session_id: 1,
            next_czxid: 1,
            child_watches: HashMap::new(),
            data_watches: HashMap::new(),
        }
    }
}

impl State {
    fn check_session(&self, id: u64) -> Result<()> {
        match self.sessions.get(&id).map(|s| s.status) {
            Some(Status::Connected) => Ok(()),
            Some(Status::Expired) => Err(Error::SessionExpired),
            _ => Err(Error::ConnectionLoss),
        }
    }

    fn send(&self, session: u64, event: StoreEvent) {
        if let Some(slot) = self.sessions.get(&session) {
            if let Some(events) = &slot.events {
                // A dropped receiver just means nobody is listening any more
                _ = events.send(event);
            }
        }
    }

    fn fire_children_changed(&mut self, parent: &str) {
        if let Some(watchers) = self.child_watches.remove(parent) {
            for session in watchers {
                self.send(
                    session,
                    StoreEvent::ChildrenChanged {
                        path: parent.to_string(),
                    },
                );
            }
        }
    }

    fn fire_data_changed(&mut self, path: &str) {
        if let Some(watchers) = self.data_watches.remove(path) {
            for session in watchers {
                self.send(
                    session,
                    StoreEvent::DataChanged {
                        path: path.to_string(),
                    },
                );
            }
        }
    }

    fn fire_deleted(&mut self, path: &str) {
        let mut watchers = self.data_watches.remove(path).unwrap_or_default();
        watchers.extend(self.child_watches.remove(path).unwrap_or_default());
        for session in watchers {
            self.send(
                session,
                StoreEvent::NodeDeleted {
                    path: path.to_string(),
                },
            );
        }
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                (!rest.is_empty() && !rest.contains(path::SEPARATOR)).then(|| rest.to_string())
            })
            .collect()
    }

    fn stat(&self, path: &str, node: &Znode) -> Stat {
        Stat {
            version: node.version,
            czxid: node.czxid,
            ctime: node.ctime,
            mtime: node.mtime,
            num_children: self.children_of(path).len(),
            ephemeral_owner: node.ephemeral_owner,
        }
    }

    fn create(&mut self, session: u64, path: &str, value: &[u8], mode: CreateMode) -> Result<String> {
        path::validate(path)?;
        let parent = path::dirname(path).ok_or_else(|| Error::node_exists(path))?;
        let parent_node = self
            .nodes
            .get_mut(parent)
            .ok_or_else(|| Error::no_node(path))?;
        if parent_node.ephemeral_owner.is_some() {
            return Err(Error::bad_arguments(format!(
                "ephemeral node cannot have children: {parent}"
            )));
        }

        let actual = if mode.sequential {
            let seq = parent_node.next_sequence;
            parent_node.next_sequence += 1;
            format!("{path}{seq:010}")
        } else {
            path.to_string()
        };

        if self.nodes.contains_key(&actual) {
            return Err(Error::node_exists(&actual));
        }

        let czxid = self.next_czxid;
        self.next_czxid += 1;
        _ = self.nodes.insert(
            actual.clone(),
            Znode::new(value, czxid, mode.ephemeral.then_some(session)),
        );
        self.fire_children_changed(parent);
        Ok(actual)
    }

    fn get(&mut self, session: u64, path: &str, watch: bool) -> Result<(Vec<u8>, Stat)> {
        let node = self.nodes.get(path).ok_or_else(|| Error::no_node(path))?;
        let result = (node.value.clone(), self.stat(path, node));
        if watch {
            _ = self
                .data_watches
                .entry(path.to_string())
                .or_default()
                .insert(session);
        }
        Ok(result)
    }

    fn set(&mut self, path: &str, value: &[u8]) -> Result<Stat> {
        let node = self.nodes.get_mut(path).ok_or_else(|| Error::no_node(path))?;
        node.value = value.to_vec();
        node.version += 1;
        node.mtime = chrono::Utc::now().timestamp_micros();
        let node = node.clone();
        let stat = self.stat(path, &node);
        self.fire_data_changed(path);
        Ok(stat)
    }

    fn set_if_version(&mut self, path: &str, value: &[u8], version: i64) -> Result<Stat> {
        let node = self.nodes.get(path).ok_or_else(|| Error::no_node(path))?;
        if node.version != version {
            return Err(Error::bad_version(path));
        }
        self.set(path, value)
    }

    fn delete_if_created(&mut self, path: &str, czxid: u64) -> Result<()> {
        let node = self.nodes.get(path).ok_or_else(|| Error::no_node(path))?;
        if node.czxid != czxid {
            return Err(Error::bad_version(path));
        }
        self.delete(path)
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        path::validate(path)?;
        let parent = path::dirname(path)
            .ok_or_else(|| Error::bad_arguments("cannot delete the root node"))?;
        if !self.nodes.contains_key(path) {
            return Err(Error::no_node(path));
        }
        if !self.children_of(path).is_empty() {
            return Err(Error::not_empty(path));
        }
        _ = self.nodes.remove(path);
        self.fire_deleted(path);
        self.fire_children_changed(parent);
        Ok(())
    }

    fn get_children(&mut self, session: u64, path: &str, watch: bool) -> Result<Vec<String>> {
        if !self.nodes.contains_key(path) {
            return Err(Error::no_node(path));
        }
        if watch {
            _ = self
                .child_watches
                .entry(path.to_string())
                .or_default()
                .insert(session);
        }
        Ok(self.children_of(path))
    }

    /// Drop everything tied to a session: ephemeral nodes first, then watches
    fn end_session(&mut self, session: u64) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.ephemeral_owner == Some(session))
            .map(|(k, _)| k.clone())
            .collect();
        for path in owned {
            if let Err(e) = self.delete(&path) {
                let error_str = e.to_string();
                warn!("failed to remove ephemeral node {path}: {error}", path: path, error: error_str);
            }
        }
        for watchers in self.child_watches.values_mut() {
            _ = watchers.remove(&session);
        }
        for watchers in self.data_watches.values_mut() {
            _ = watchers.remove(&session);
        }
    }

    fn set_status(&mut self, session: u64, status: Status) {
        if let Some(slot) = self.sessions.get_mut(&session) {
            slot.status = status;
        }
    }
}

/// Shared in-memory store; cheap to clone
#[derive(Clone, Default)]
pub struct MemoryStore(Arc<Mutex<State>>);

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new, not yet connected, session against this store
    pub async fn session(&self) -> MemorySession {
        let mut state = self.0.lock().await;
        let id = state.next_session_id;
        state.next_session_id += 1;
        _ = state.sessions.insert(
            id,
            SessionSlot {
                status: Status::Idle,
                events: None,
            },
        );
        MemorySession {
            state: Arc::clone(&self.0),
            id,
        }
    }

    /// Number of nodes in the tree, including the root
    pub async fn node_count(&self) -> usize {
        self.0.lock().await.nodes.len()
    }
}

/// One client session on a `MemoryStore`
pub struct MemorySession {
    state: Arc<Mutex<State>>,
    id: u64,
}

impl MemorySession {
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.id
    }

    async fn with_session<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut State, u64) -> Result<T> + Send,
        T: Send,
    {
        let mut state = self.state.lock().await;
        state.check_session(self.id)?;
        f(&mut state, self.id)
    }

    /// Simulate a dropped connection; the session itself survives
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        state.set_status(self.id, Status::Disconnected);
        state.send(self.id, StoreEvent::Session(SessionState::Disconnected));
        debug!("memory session {id} disconnected", id: self.id);
    }

    /// Restore a connection dropped by `disconnect`
    pub async fn reconnect(&self) {
        let mut state = self.state.lock().await;
        let current = state.sessions.get(&self.id).map(|s| s.status);
        if current == Some(Status::Disconnected) {
            state.set_status(self.id, Status::Connected);
            state.send(self.id, StoreEvent::Session(SessionState::Connected));
            debug!("memory session {id} reconnected", id: self.id);
        }
    }

    /// Simulate session expiry: ephemeral nodes and watches are dropped
    pub async fn expire(&self) {
        let mut state = self.state.lock().await;
        state.end_session(self.id);
        state.set_status(self.id, Status::Expired);
        state.send(self.id, StoreEvent::Session(SessionState::Expired));
        debug!("memory session {id} expired", id: self.id);
    }
}

#[async_trait]
impl CoordinationClient for MemorySession {
    async fn connect(&self, events: UnboundedSender<StoreEvent>) -> Result<()> {
        let mut state = self.state.lock().await;
        let slot = state
            .sessions
            .get_mut(&self.id)
            .ok_or_else(|| Error::other(format!("unknown session {}", self.id)))?;
        if slot.status == Status::Closed {
            return Err(Error::ConnectionLoss);
        }
        slot.status = Status::Connected;
        slot.events = Some(events);
        state.send(self.id, StoreEvent::Session(SessionState::Connected));
        debug!("memory session {id} connected", id: self.id);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.end_session(self.id);
        state.set_status(self.id, Status::Closed);
        if let Some(slot) = state.sessions.get_mut(&self.id) {
            slot.events = None;
        }
        debug!("memory session {id} closed", id: self.id);
        Ok(())
    }

    async fn create(&self, path: &str, value: &[u8], mode: CreateMode) -> Result<String> {
        self.with_session(|state, id| state.create(id, path, value, mode))
            .await
    }

    async fn get(&self, path: &str, watch: bool) -> Result<(Vec<u8>, Stat)> {
        self.with_session(|state, id| state.get(id, path, watch)).await
    }

    async fn set(&self, path: &str, value: &[u8]) -> Result<Stat> {
        self.with_session(|state, _| state.set(path, value)).await
    }

    async fn set_if_version(&self, path: &str, value: &[u8], version: i64) -> Result<Stat> {
        self.with_session(|state, _| state.set_if_version(path, value, version))
            .await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.with_session(|state, _| state.delete(path)).await
    }

    async fn delete_if_created(&self, path: &str, czxid: u64) -> Result<()> {
        self.with_session(|state, _| state.delete_if_created(path, czxid))
            .await
    }

    async fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>> {
        self.with_session(|state, id| state.get_children(id, path, watch))
            .await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.with_session(|state, _| Ok(state.nodes.contains_key(path)))
            .await
    }
}
