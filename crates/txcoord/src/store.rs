//! Connection-gated store access shared by every component.
//!
//! Each call first waits (bounded) for the session to be connected; a
//! timeout surfaces as `coordstore::Error::ConnectionLoss`, which converts
//! to `TxError::NoConnection`. Callers match on `NoNode`/`NodeExists` where
//! those are expected races and propagate everything else with `?`.

use crate::session::SessionManager;
use coordstore::{CoordinationClient, CreateMode, Error, Result, Stat, path};
use diagnostics::*;
use std::sync::Arc;
use std::time::Duration;

pub struct Store {
    session: Arc<SessionManager>,
    connect_timeout: Duration,
    max_create_attempts: u32,
}

impl Store {
    pub fn new(session: Arc<SessionManager>, connect_timeout: Duration, max_create_attempts: u32) -> Self {
        Self {
            session,
            connect_timeout,
            max_create_attempts: max_create_attempts.max(2),
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    async fn client(&self) -> Result<&dyn CoordinationClient> {
        self.session
            .wait_for_connection(self.connect_timeout)
            .await
            .map_err(|_| Error::ConnectionLoss)?;
        Ok(self.session.client())
    }

    pub async fn create(&self, path: &str, value: &[u8], mode: CreateMode) -> Result<String> {
        self.client().await?.create(path, value, mode).await
    }

    pub async fn get(&self, path: &str) -> Result<Vec<u8>> {
        Ok(self.client().await?.get(path, false).await?.0)
    }

    pub async fn get_with_stat(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        self.client().await?.get(path, false).await
    }

    pub async fn get_string(&self, path: &str) -> Result<String> {
        let value = self.get(path).await?;
        Ok(String::from_utf8_lossy(&value).into_owned())
    }

    /// `None` when the node does not exist
    pub async fn get_string_opt(&self, path: &str) -> Result<Option<String>> {
        match self.get_string(path).await {
            Ok(value) => Ok(Some(value)),
            Err(Error::NoNode(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn set(&self, path: &str, value: &[u8]) -> Result<()> {
        _ = self.client().await?.set(path, value).await?;
        Ok(())
    }

    pub async fn set_if_version(&self, path: &str, value: &[u8], version: i64) -> Result<()> {
        _ = self.client().await?.set_if_version(path, value, version).await?;
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.client().await?.delete(path).await
    }

    pub async fn delete_if_created(&self, path: &str, czxid: u64) -> Result<()> {
        self.client().await?.delete_if_created(path, czxid).await
    }

    pub async fn children(&self, path: &str, watch: bool) -> Result<Vec<String>> {
        self.client().await?.get_children(path, watch).await
    }

    /// Like `children`, but never waits for the session: fails straight
    /// away with `ConnectionLoss` while disconnected. Used from watch
    /// handlers, which run on the event pump that moves the session back
    /// to connected.
    pub async fn children_now(&self, path: &str, watch: bool) -> Result<Vec<String>> {
        self.session.client().get_children(path, watch).await
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.client().await?.exists(path).await
    }

    /// Create `path` and any missing ancestors as empty persistent nodes.
    /// Concurrent creators do not fail each other.
    pub async fn ensure_path(&self, target: &str) -> Result<()> {
        let mut chain = path::ancestors(target);
        chain.push(target);
        for node in chain {
            match self.create(node, b"", CreateMode::PERSISTENT).await {
                Ok(_) | Err(Error::NodeExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Create a node; if its parent is missing, create the parent chain and
    /// try again, up to `max_create_attempts` tries in total.
    pub async fn create_with_parents(&self, target: &str, value: &[u8], mode: CreateMode) -> Result<String> {
        let parent = path::dirname(target).ok_or_else(|| Error::node_exists(target))?;
        let mut attempt = 1;
        loop {
            match self.create(target, value, mode).await {
                Err(Error::NoNode(_)) if attempt < self.max_create_attempts => {
                    debug!("creating missing parent {parent}", parent: parent);
                    self.ensure_path(parent).await?;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Create or overwrite a persistent node
    pub async fn upsert(&self, target: &str, value: &[u8]) -> Result<()> {
        match self.create_with_parents(target, value, CreateMode::PERSISTENT).await {
            Ok(_) => Ok(()),
            Err(Error::NodeExists(_)) => self.set(target, value).await,
            Err(e) => Err(e),
        }
    }

    /// Delete a node, returning whether it existed
    pub async fn delete_if_exists(&self, path: &str) -> Result<bool> {
        match self.delete(path).await {
            Ok(()) => Ok(true),
            Err(Error::NoNode(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete a node and all of its descendants; nodes that vanish
    /// concurrently are skipped
    pub async fn delete_recursive(&self, root: &str) -> Result<()> {
        let mut visit = vec![root.to_string()];
        let mut order = Vec::new();
        while let Some(node) = visit.pop() {
            match self.children(&node, false).await {
                Ok(names) => {
                    visit.extend(names.iter().map(|name| path::join(&node, name)));
                    order.push(node);
                }
                Err(Error::NoNode(_)) => {}
                Err(e) => return Err(e),
            }
        }
        // Pre-order reversed puts every child before its parent
        for node in order.iter().rev() {
            _ = self.delete_if_exists(node).await?;
        }
        Ok(())
    }
}
