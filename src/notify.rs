use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

/// Outcomes other collaborators may react to (toasts, email, dashboards).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    RequestAllocated {
        request_id: Ulid,
        occupancy_id: Ulid,
        case_id: Ulid,
        bed_id: Ulid,
        agency_id: Ulid,
    },
    RequestDenied {
        request_id: Ulid,
        case_id: Ulid,
        agency_id: Ulid,
        reason: String,
    },
    RequestDeleted {
        request_id: Ulid,
        case_id: Ulid,
        agency_id: Ulid,
    },
    OccupancyReleased {
        occupancy_id: Ulid,
        case_id: Ulid,
        bed_id: Ulid,
        agency_id: Ulid,
    },
}

impl DomainEvent {
    /// Agency whose channel receives the event.
    pub fn agency_id(&self) -> Ulid {
        match self {
            DomainEvent::RequestAllocated { agency_id, .. }
            | DomainEvent::RequestDenied { agency_id, .. }
            | DomainEvent::RequestDeleted { agency_id, .. }
            | DomainEvent::OccupancyReleased { agency_id, .. } => *agency_id,
        }
    }

    /// JSON payload handed to delivery collaborators.
    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Fire-and-forget broadcast of committed domain events, one channel per
/// agency plus one for the whole network.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<DomainEvent>>,
    network: broadcast::Sender<DomainEvent>,
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
            network: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to events for one agency. Creates the channel if needed.
    pub fn subscribe(&self, agency_id: Ulid) -> broadcast::Receiver<DomainEvent> {
        self.channels
            .entry(agency_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<DomainEvent> {
        self.network.subscribe()
    }

    /// Send a notification. No-op if nobody is listening; delivery problems
    /// never reach the caller. An agency channel whose last receiver is gone
    /// is dropped here.
    pub fn send(&self, event: DomainEvent) {
        tracing::debug!(payload = %event.payload(), "domain event");
        let agency_id = event.agency_id();
        let idle = match self.channels.get(&agency_id) {
            Some(sender) => sender.send(event.clone()).is_err(),
            None => false,
        };
        if idle {
            // Rechecked under the shard lock: a concurrent subscribe keeps it.
            self.channels
                .remove_if(&agency_id, |_, sender| sender.receiver_count() == 0);
        }
        let _ = self.network.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deleted(agency_id: Ulid) -> DomainEvent {
        DomainEvent::RequestDeleted {
            request_id: Ulid::new(),
            case_id: Ulid::new(),
            agency_id,
        }
    }

    #[tokio::test]
    async fn agency_subscriber_receives_own_events() {
        let hub = NotifyHub::new();
        let agency = Ulid::new();
        let mut rx = hub.subscribe(agency);

        let event = deleted(agency);
        hub.send(event.clone());
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_agencies_are_not_notified() {
        let hub = NotifyHub::new();
        let mine = Ulid::new();
        let mut rx = hub.subscribe(mine);
        hub.send(deleted(Ulid::new()));
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn network_subscriber_sees_everything() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe_all();
        hub.send(deleted(Ulid::new()));
        hub.send(deleted(Ulid::new()));
        assert!(rx.recv().await.is_ok());
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn abandoned_agency_channel_is_pruned() {
        let hub = NotifyHub::new();
        let gone = Ulid::new();
        let kept = Ulid::new();
        drop(hub.subscribe(gone));
        let _rx = hub.subscribe(kept);
        assert_eq!(hub.channels.len(), 2);

        hub.send(deleted(gone));
        hub.send(deleted(kept));
        assert!(!hub.channels.contains_key(&gone));
        assert!(hub.channels.contains_key(&kept));

        let mut again = hub.subscribe(gone);
        let event = deleted(gone);
        hub.send(event.clone());
        assert_eq!(again.try_recv().unwrap(), event);
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(deleted(Ulid::new()));
    }

    #[test]
    fn payload_is_tagged_json() {
        let event = DomainEvent::RequestDenied {
            request_id: Ulid::new(),
            case_id: Ulid::new(),
            agency_id: Ulid::new(),
            reason: "Ineligible".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&event.payload()).unwrap();
        assert_eq!(json["type"], "RequestDenied");
        assert_eq!(json["reason"], "Ineligible");
    }
}
