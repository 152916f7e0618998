use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    BookingRequested,
    BookingConfirmed,
    BookingCancelled,
    BookingCompleted,
    BookingNoShow,
    PaymentRecorded,
}

/// What the external delivery collaborator is asked to send.
/// The engine only describes the notification; it never delivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub recipient_id: Ulid,
    pub kind: IntentKind,
    pub title: String,
    pub message: String,
    pub related_id: Ulid,
}

/// Broadcast hub, one channel per recipient. Delivery collaborators
/// subscribe; sends without a subscriber are dropped.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<NotificationIntent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to intents addressed to a recipient. Creates the channel
    /// if needed.
    pub fn subscribe(&self, recipient_id: Ulid) -> broadcast::Receiver<NotificationIntent> {
        let sender = self
            .channels
            .entry(recipient_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an intent. No-op if nobody is listening for the recipient.
    pub fn send(&self, intent: &NotificationIntent) {
        if let Some(sender) = self.channels.get(&intent.recipient_id) {
            let _ = sender.send(intent.clone());
        }
    }

    /// Drop a recipient's channel.
    pub fn remove(&self, recipient_id: &Ulid) {
        self.channels.remove(recipient_id);
    }
}
