//! Connection registry: which user owns which live connection.
//!
//! Every other component addresses users by id, never by raw connection.
//! A user holds at most one live handle; registering a second one replaces
//! the first, whose channel is dropped so stale sends go nowhere.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use crate::events::ServerEvent;
use crate::participant::UserId;

/// Sending half of a client's event stream.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Outcome of a delivery attempt. Undeliverable is never fatal: the caller
/// drops or queues the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Undeliverable,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    // Plain mutex: critical sections are map lookups only, never awaited.
    inner: Mutex<HashMap<UserId, EventSender>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user, replacing any previous one.
    pub fn register(&self, user: UserId, tx: EventSender) {
        let replaced = self.inner.lock().unwrap().insert(user.clone(), tx);
        if replaced.is_some() {
            debug!(%user, "replaced existing connection");
        }
    }

    pub fn unregister(&self, user: &UserId) {
        self.inner.lock().unwrap().remove(user);
    }

    /// Whether a live connection is currently registered for the user.
    pub fn is_connected(&self, user: &UserId) -> bool {
        self.inner.lock().unwrap().contains_key(user)
    }

    /// Deliver an event to a user's current connection.
    pub fn send(&self, user: &UserId, event: ServerEvent) -> Delivery {
        let tx = match self.inner.lock().unwrap().get(user) {
            Some(tx) => tx.clone(),
            None => {
                debug!(%user, "send to unconnected user dropped");
                return Delivery::Undeliverable;
            }
        };
        match tx.send(event) {
            Ok(()) => Delivery::Delivered,
            Err(_) => {
                debug!(%user, "receiver gone, send dropped");
                Delivery::Undeliverable
            }
        }
    }
}
