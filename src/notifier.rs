use async_channel::{Receiver, Sender, TrySendError};
use botagent_core::MessageKind;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Capacity of the outbound user-notification channel.
pub const NOTIFICATION_CAPACITY: usize = 16;

/// Outbound channel of user-facing messages, drained by the UI on its own thread.
///
/// Sending never blocks: if the UI falls behind, messages are dropped with a
/// warning. Within one connection attempt each kind is delivered at most once.
#[derive(Clone)]
pub struct Notifier {
    tx: Sender<MessageKind>,
    delivered: Arc<Mutex<HashSet<MessageKind>>>,
}

impl Notifier {
    pub fn new() -> (Self, Receiver<MessageKind>) {
        let (tx, rx) = async_channel::bounded(NOTIFICATION_CAPACITY);
        let notifier = Self {
            tx,
            delivered: Arc::new(Mutex::new(HashSet::new())),
        };
        (notifier, rx)
    }

    /// Start a new connection attempt, re-arming every message kind.
    pub fn begin_attempt(&self) {
        self.delivered.lock().clear();
    }

    /// Queue `kind` for the UI. Returns whether it was queued.
    pub fn notify(&self, kind: MessageKind) -> bool {
        if !self.delivered.lock().insert(kind) {
            log::debug!("Suppressing duplicate notification {:?}", kind);
            return false;
        }
        match self.tx.try_send(kind) {
            Ok(()) => true,
            Err(TrySendError::Full(kind)) => {
                log::warn!("Notification channel full, dropping {:?}", kind);
                false
            }
            Err(TrySendError::Closed(kind)) => {
                log::debug!("No notification listener, dropping {:?}", kind);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_kind_is_delivered_once_per_attempt() {
        let (notifier, rx) = Notifier::new();
        assert!(notifier.notify(MessageKind::ConnectionFailed));
        assert!(!notifier.notify(MessageKind::ConnectionFailed));
        assert!(notifier.notify(MessageKind::UnexpectedError));
        assert_eq!(rx.try_recv().unwrap(), MessageKind::ConnectionFailed);
        assert_eq!(rx.try_recv().unwrap(), MessageKind::UnexpectedError);
        assert!(rx.try_recv().is_err());

        notifier.begin_attempt();
        assert!(notifier.notify(MessageKind::ConnectionFailed));
        assert_eq!(rx.try_recv().unwrap(), MessageKind::ConnectionFailed);
    }

    #[test]
    fn full_channel_never_blocks() {
        let (notifier, rx) = Notifier::new();
        for _ in 0..NOTIFICATION_CAPACITY + 4 {
            notifier.begin_attempt();
            notifier.notify(MessageKind::ConnectionFailed);
        }
        assert_eq!(rx.len(), NOTIFICATION_CAPACITY);
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (notifier, rx) = Notifier::new();
        drop(rx);
        assert!(!notifier.notify(MessageKind::VersionIncompatible));
    }
}
