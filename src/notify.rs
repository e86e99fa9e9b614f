use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Reservation;

const CHANNEL_CAPACITY: usize = 256;

/// Something a user should hear about. Delivery (mail, push, ...) is up to
/// whoever drains the channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// To the guest who just booked.
    NewUserReservation { reservation: Reservation },
    /// To the host whose office was booked.
    NewHostReservation { reservation: Reservation },
    /// To reviewers, after an edit sent an approved office back to review.
    OfficePendingApproval { office_id: Ulid },
}

impl Notice {
    pub fn kind(&self) -> &'static str {
        match self {
            Notice::NewUserReservation { .. } => "new_user_reservation",
            Notice::NewHostReservation { .. } => "new_host_reservation",
            Notice::OfficePendingApproval { .. } => "office_pending_approval",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Outbound notification boundary. Called only after the change is durable,
/// never while an office lock is held.
pub trait Notifier: Send + Sync {
    fn notify(&self, recipient: Ulid, notice: Notice);
}

/// Broadcast hub with one channel per recipient.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notice>>,
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

    /// Subscribe to notices for a user. Creates the channel if needed.
    pub fn subscribe(&self, recipient: Ulid) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(recipient)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Drop a recipient's channel.
    pub fn remove(&self, recipient: &Ulid) {
        self.channels.remove(recipient);
    }
}

impl Notifier for NotifyHub {
    /// No-op if nobody is listening.
    fn notify(&self, recipient: Ulid, notice: Notice) {
        if let Some(sender) = self.channels.get(&recipient) {
            let _ = sender.send(notice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let user = Ulid::new();
        let mut rx = hub.subscribe(user);

        let notice = Notice::OfficePendingApproval { office_id: Ulid::new() };
        hub.notify(user, notice.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, notice);
    }

    #[tokio::test]
    async fn recipients_are_isolated() {
        let hub = NotifyHub::new();
        let (alice, bob) = (Ulid::new(), Ulid::new());
        let mut bob_rx = hub.subscribe(bob);
        hub.notify(alice, Notice::OfficePendingApproval { office_id: Ulid::new() });
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.notify(Ulid::new(), Notice::OfficePendingApproval { office_id: Ulid::new() });
    }

    #[test]
    fn json_carries_kind_tag() {
        let office_id = Ulid::new();
        let notice = Notice::OfficePendingApproval { office_id };
        let json = notice.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["kind"], notice.kind());
        assert_eq!(value["office_id"], office_id.to_string());
    }
}
