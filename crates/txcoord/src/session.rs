//! Session ownership and notification routing.
//!
//! The `SessionManager` connects the injected `CoordinationClient`, tracks
//! its connected/disconnected state in a `watch` channel, and runs the event
//! pump: a task draining the session's `StoreEvent` channel. Session events
//! update the state; watch events are handed to a `WatchListener`.

use crate::error::{Result, TxError};
use async_trait::async_trait;
use coordstore::{CoordinationClient, SessionState, StoreEvent};
use diagnostics::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, WeakUnboundedSender};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// Consumer of routed watch notifications
#[async_trait]
pub trait WatchListener: Send + Sync {
    /// A one-shot watch fired; the listener re-registers if it still cares.
    /// Runs on the event pump, ahead of any queued session state change, so
    /// it must not wait for the session to reconnect.
    async fn watch_fired(&self, event: &StoreEvent);

    /// The session expired and every watch it held is gone
    async fn session_expired(&self);
}

pub struct SessionManager {
    client: Arc<dyn CoordinationClient>,
    state: Arc<watch::Sender<SessionState>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(client: Arc<dyn CoordinationClient>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            client,
            state: Arc::new(state),
            pump: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn client(&self) -> &dyn CoordinationClient {
        self.client.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Start the session and the event pump feeding `listener`
    pub async fn connect(&self, listener: Arc<dyn WatchListener>) -> Result<()> {
        let (events, receiver) = mpsc::unbounded_channel();
        let reconnect_with = events.downgrade();
        self.client.connect(events).await?;

        let handle = tokio::spawn(pump(
            receiver,
            Arc::clone(&self.state),
            listener,
            Arc::clone(&self.client),
            reconnect_with,
        ));
        if let Some(previous) = self.pump.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Block until the session reports connected, or fail after `timeout`
    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let mut receiver = self.state.subscribe();
        let waited =
            tokio::time::timeout(timeout, receiver.wait_for(|s| *s == SessionState::Connected))
                .await;
        match waited {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(TxError::NoConnection("session closed".to_string())),
            Err(_) => Err(TxError::NoConnection(format!(
                "not connected after {} ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Stop the event pump and end the session
    pub async fn close(&self) -> Result<()> {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        _ = self.state.send_replace(SessionState::Disconnected);
        self.client.close().await?;
        info!("coordination session closed");
        Ok(())
    }
}

async fn pump(
    mut receiver: UnboundedReceiver<StoreEvent>,
    state: Arc<watch::Sender<SessionState>>,
    listener: Arc<dyn WatchListener>,
    client: Arc<dyn CoordinationClient>,
    reconnect_with: WeakUnboundedSender<StoreEvent>,
) {
    while let Some(event) = receiver.recv().await {
        match event {
            StoreEvent::Session(session_state) => {
                let state_str = format!("{session_state:?}");
                info!("coordination session state {state}", state: state_str);
                _ = state.send_replace(session_state);

                if session_state == SessionState::Expired {
                    listener.session_expired().await;
                    // Expiry is terminal for a session; open a fresh one on the same channel
                    if let Some(events) = reconnect_with.upgrade() {
                        if let Err(e) = client.connect(events).await {
                            let error_str = e.to_string();
                            warn!("failed to re-establish expired session: {error}", error: error_str);
                        }
                    }
                }
            }
            watch_event => listener.watch_fired(&watch_event).await,
        }
    }
    debug!("coordination event pump finished");
}
