use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Fire-and-forget signals consumed by the status aggregation subsystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusEvent {
    /// Drop all cached status and modeling state for a policy key.
    Delete(String),
    /// Drop cached per-node status for a policy key ahead of a profile
    /// rebuild.
    Reset(String),
    /// Recompute and report status for a policy key without any profile
    /// mutation.
    Refresh(String),
    /// The set of live profiles changed; the aggregator's desired count must
    /// be recomputed.
    DesiredCountStale,
}

/// Send-and-don't-wait mailbox into the status manager. Failures are
/// invisible to the reconciler by design; a closed mailbox only means the
/// aggregator is shutting down.
#[derive(Clone, Debug)]
pub struct StatusManagerHandle {
    tx: UnboundedSender<StatusEvent>,
}

impl StatusManagerHandle {
    pub fn channel() -> (Self, UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn delete(&self, key: impl ToString) {
        self.send(StatusEvent::Delete(key.to_string()));
    }

    pub fn reset(&self, key: impl ToString) {
        self.send(StatusEvent::Reset(key.to_string()));
    }

    pub fn refresh(&self, key: impl ToString) {
        self.send(StatusEvent::Refresh(key.to_string()));
    }

    pub fn desired_count_stale(&self) {
        self.send(StatusEvent::DesiredCountStale);
    }

    fn send(&self, event: StatusEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("status manager mailbox closed");
        }
    }
}
