//! Typed notifications pushed by a store session onto its event channel.

/// Session lifecycle as reported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Disconnected,
    /// The session is gone: its ephemeral nodes and watches are lost
    Expired,
}

/// Everything a session reports asynchronously.
///
/// Watch events are one-shot: a watcher that wants further notifications
/// must re-register by reading the path again with `watch = true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Session(SessionState),
    ChildrenChanged { path: String },
    DataChanged { path: String },
    NodeDeleted { path: String },
}

impl StoreEvent {
    /// The path this event concerns, if it is a watch event
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            StoreEvent::Session(_) => None,
            StoreEvent::ChildrenChanged { path }
            | StoreEvent::DataChanged { path }
            | StoreEvent::NodeDeleted { path } => Some(path),
        }
    }
}
