use tokio::sync::broadcast;
use tracing::debug;

/// Outbound, fire-and-forget notification channel.
pub trait Notifier: Send + Sync {
    fn publish(&self, topic: &str, payload: String);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub topic: String,
    pub payload: String,
}

/// Fans notifications out to every current subscriber. Publishing with no
/// subscriber is not an error.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, topic: &str, payload: String) {
        let notification = Notification {
            topic: topic.to_string(),
            payload,
        };
        if self.tx.send(notification).is_err() {
            debug!(topic, "no subscriber for notification");
        }
    }
}
