//! In-process broadcast of paid donation alerts to open overlay streams.
//!
//! Delivery is at-most-once: a subscriber whose buffer is full, or whose
//! receiver is gone, silently misses the alert.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

pub const DEFAULT_BUFFER: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub supporter_name: String,
    pub amount: i64,
    pub message: String,
    pub creator_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_emoji: Option<String>,
    pub quantity: i32,
}

pub type AlertSender = mpsc::Sender<AlertEvent>;
pub type AlertReceiver = mpsc::Receiver<AlertEvent>;

/// Registry of live alert channels keyed by creator.
#[derive(Debug)]
pub struct AlertHub {
    buffer: usize,
    next_id: AtomicU64,
    clients: RwLock<HashMap<String, Vec<(u64, AlertSender)>>>,
}

impl Default for AlertHub {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl AlertHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Add a channel for the creator, returns the id used to unregister it.
    pub fn register(&self, key: &str, sender: AlertSender) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients
            .write()
            .entry(key.to_owned())
            .or_default()
            .push((id, sender));
        debug!(creator = key, id, "Alert channel registered");
        id
    }

    /// Remove and drop the channel. Returns false if it was already gone.
    pub fn unregister(&self, key: &str, id: u64) -> bool {
        let mut clients = self.clients.write();
        let Some(channels) = clients.get_mut(key) else {
            return false;
        };
        let before = channels.len();
        channels.retain(|(cid, _)| *cid != id);
        let removed = channels.len() != before;
        if channels.is_empty() {
            clients.remove(key);
        }
        if removed {
            debug!(creator = key, id, "Alert channel unregistered");
        }
        removed
    }

    /// Offer the event to every channel of the creator without blocking.
    /// Returns the number of channels that accepted it.
    pub fn broadcast(&self, key: &str, event: &AlertEvent) -> usize {
        let clients = self.clients.read();
        let Some(channels) = clients.get(key) else {
            return 0;
        };
        let mut delivered = 0;
        for (id, sender) in channels {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(creator = key, id, "Alert channel full, dropped")
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(creator = key, id, "Alert channel closed, dropped")
                }
            }
        }
        info!(
            creator = key,
            clients = channels.len(),
            delivered,
            "Alert broadcast"
        );
        delivered
    }

    pub fn count(&self, key: &str) -> usize {
        self.clients.read().get(key).map(Vec::len).unwrap_or(0)
    }

    /// Register a fresh bounded channel, unregistered when the subscription drops.
    pub fn subscribe(self: &Arc<Self>, key: &str) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.register(key, sender);
        Subscription {
            hub: Arc::clone(self),
            key: key.to_owned(),
            id,
            receiver,
        }
    }
}

pub struct Subscription {
    hub: Arc<AlertHub>,
    key: String,
    id: u64,
    receiver: AlertReceiver,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<AlertEvent> {
        self.receiver.recv().await
    }

    /// next buffered alert, if any
    pub fn try_recv(&mut self) -> Option<AlertEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unregister(&self.key, self.id);
    }
}
