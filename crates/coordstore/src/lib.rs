//! Coordstore - contract of a hierarchical coordination store
//!
//! The transaction core talks to its coordination store (a ZooKeeper-like
//! tree with atomic create, sequential and ephemeral nodes, and one-shot
//! watches) only through the `CoordinationClient` trait defined here.
//! Notifications are not callbacks: a session pushes typed `StoreEvent`s
//! onto the channel it was connected with.
//!
//! `memory::MemoryStore` is a complete in-process implementation used by
//! tests and single-process deployments.

mod client;
mod error;
mod event;

pub mod dump;
pub mod memory;
pub mod path;

pub use client::{CoordinationClient, CreateMode, Stat};
pub use dump::{DumpNode, dump_tree};
pub use error::{Error, Result};
pub use event::{SessionState, StoreEvent};
pub use memory::{MemorySession, MemoryStore};
