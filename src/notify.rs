//! Outbound notification boundary. Ledger operations never talk to a
//! dispatcher directly: they enqueue into a persisted outbox in the same
//! batch as their ledger writes, and a drain pass delivers entries
//! at-least-once. A dispatch failure is logged and retried on the next
//! drain; it never fails the ledger operation that queued it.
use super::error::LedgerError;
use super::store::LedgerStore;
use super::transaction::TimeStamp;
use chrono::Utc;
use tracing::warn;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Eq, PartialEq, Clone)]
pub enum NotificationKind {
    #[n(0)]
    PointsExpiringSoon {
        #[n(0)]
        days_left: i64,
    },
    #[n(1)]
    PointsExpired,
    #[n(2)]
    RedemptionCreated,
    #[n(3)]
    RedemptionFulfilled,
    #[n(4)]
    RedemptionRejected,
    #[n(5)]
    RedemptionCancelled,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Eq, PartialEq, Clone)]
pub struct Notification {
    #[n(0)]
    pub recipient_id: String,
    #[n(1)]
    pub kind: NotificationKind,
    #[n(2)]
    pub title: String,
    #[n(3)]
    pub message: String,
    #[n(4)]
    pub queued_at: TimeStamp<Utc>,
}

impl Notification {
    pub fn new(recipient_id: &str, kind: NotificationKind, title: &str, message: &str) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            kind,
            title: title.into(),
            message: message.into(),
            queued_at: TimeStamp::new(),
        }
    }
}

/// The external dispatcher seam (push, email, in-app, whatever the
/// surrounding application wires in).
pub trait Notifier {
    fn dispatch(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Discards everything. Useful in tests and batch tools.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn dispatch(&self, _notification: &Notification) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Deliver queued notifications. Entries are removed only after a
/// successful dispatch; failures stay queued for the next drain, so
/// delivery is at-least-once. Returns the number delivered.
pub fn drain_outbox(store: &LedgerStore, notifier: &dyn Notifier) -> Result<usize, LedgerError> {
    let mut delivered = 0;

    for (key, notification) in store.outbox_entries()? {
        match notifier.dispatch(&notification) {
            Ok(()) => {
                store.remove_outbox_entry(&key)?;
                delivered += 1;
            }
            Err(error) => {
                warn!(
                    recipient = %notification.recipient_id,
                    %error,
                    "notification dispatch failed, leaving entry queued"
                );
            }
        }
    }

    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_encoding() {
        let original = Notification::new(
            "user_a",
            NotificationKind::PointsExpiringSoon { days_left: 3 },
            "Points expiring soon",
            "120 points with creator_b expire in 3 days",
        );

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: Notification = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }
}
