//! Fan-out of seat changes to connected subscribers.

use super::types::{
    BroadcasterConfig, ChangeEvent, DeliveryReport, InboundMessage, OutboundMessage, SubscriberHandle,
    SubscriberId,
};
use crate::background::BackgroundTask;
use crate::error::Result;
use crate::types::Timestamp;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const WELCOME_MESSAGE: &str = "connected to seat updates";

/// Internal subscriber state.
struct Subscriber {
    sender: Sender<Arc<str>>,
    /// Microseconds of the last heartbeat.
    last_seen: AtomicI64,
}

impl Subscriber {
    fn touch(&self, now: Timestamp) {
        self.last_seen.fetch_max(now.0, Ordering::Relaxed);
    }

    fn last_seen(&self) -> Timestamp {
        Timestamp(self.last_seen.load(Ordering::Relaxed))
    }
}

/// Owns the set of connected subscribers.
///
/// Publishing works on a snapshot of the set, so connects and disconnects
/// never wait on delivery and never disturb an in-flight publish. No
/// history is replayed on connect; subscribers re-read current state.
pub struct Broadcaster {
    subscribers: RwLock<HashMap<SubscriberId, Arc<Subscriber>>>,
    next_id: AtomicU64,
    config: BroadcasterConfig,
}

impl Broadcaster {
    pub fn new(config: BroadcasterConfig) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.config
    }

    /// Add a subscriber. A welcome frame is queued immediately.
    pub fn connect(&self) -> Result<SubscriberHandle> {
        self.connect_at(Timestamp::now())
    }

    pub fn connect_at(&self, now: Timestamp) -> Result<SubscriberHandle> {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.config.buffer_size.max(1));

        let welcome = OutboundMessage::Welcome {
            message: WELCOME_MESSAGE.to_string(),
        };
        let frame: Arc<str> = serde_json::to_string(&welcome)?.into();
        let _ = sender.try_send(frame);

        let subscriber = Subscriber {
            sender,
            last_seen: AtomicI64::new(now.0),
        };
        self.subscribers.write().insert(id, Arc::new(subscriber));

        debug!(subscriber = id.0, "Subscriber connected");
        Ok(SubscriberHandle { id, receiver })
    }

    /// Returns whether the subscriber was connected.
    pub fn disconnect(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            debug!(subscriber = id.0, "Subscriber disconnected");
        }
        removed
    }

    /// Push one event to every subscriber, best effort.
    pub fn publish(&self, event: &ChangeEvent) -> Result<DeliveryReport> {
        let message = OutboundMessage::SeatUpdate {
            seat: event.seat.clone(),
        };
        let frame: Arc<str> = serde_json::to_string(&message)?.into();

        let snapshot: Vec<(SubscriberId, Arc<Subscriber>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, sub)| (*id, Arc::clone(sub)))
            .collect();

        let mut report = DeliveryReport::default();
        let mut gone = Vec::new();

        for (id, subscriber) in snapshot {
            match subscriber.sender.try_send(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => report.dropped += 1,
                Err(TrySendError::Disconnected(_)) => gone.push(id),
            }
        }

        if !gone.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in &gone {
                subscribers.remove(id);
            }
            report.disconnected = gone.len();
        }

        if report.dropped > 0 {
            debug!(
                seat = %event.seat_key,
                dropped = report.dropped,
                "Slow subscribers missed an update"
            );
        }
        Ok(report)
    }

    /// Handle a frame sent by a subscriber.
    ///
    /// Returns `true` if the frame was understood. Unknown frames are
    /// ignored and never end the connection.
    pub fn receive(&self, id: SubscriberId, text: &str) -> bool {
        self.receive_at(id, text, Timestamp::now())
    }

    pub fn receive_at(&self, id: SubscriberId, text: &str, now: Timestamp) -> bool {
        match serde_json::from_str::<InboundMessage>(text) {
            Ok(InboundMessage::Ping) => {
                if let Some(subscriber) = self.subscribers.read().get(&id) {
                    subscriber.touch(now);
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Disconnect subscribers silent for longer than the heartbeat timeout.
    pub fn reap_idle_at(&self, now: Timestamp) -> Vec<SubscriberId> {
        let deadline = now.minus(self.config.heartbeat_timeout);

        let mut subscribers = self.subscribers.write();
        let idle: Vec<SubscriberId> = subscribers
            .iter()
            .filter(|(_, sub)| sub.last_seen() < deadline)
            .map(|(id, _)| *id)
            .collect();
        for id in &idle {
            subscribers.remove(id);
        }
        drop(subscribers);

        if !idle.is_empty() {
            info!(count = idle.len(), "Reaped idle subscribers");
        }
        idle
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Run the idle reaper every `reap_interval` on a background thread.
    pub fn spawn_reaper(self: &Arc<Self>) -> std::io::Result<BackgroundTask> {
        let broadcaster = Arc::clone(self);
        BackgroundTask::spawn_periodic("subscriber-reaper", self.config.reap_interval, move || {
            broadcaster.reap_idle_at(Timestamp::now());
        })
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(BroadcasterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Seat, SeatKind, SeatStatus, Sequence};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(100);

    fn event(seat_id: &str, status: SeatStatus) -> ChangeEvent {
        let seat = Seat {
            map_id: "arena".into(),
            seat_id: seat_id.into(),
            status,
            hold_expires_at: (status == SeatStatus::Held).then_some(Timestamp(99)),
            zone_id: None,
            seat_kind: SeatKind::Standard,
            position: None,
            source_tag: "circle".into(),
        };
        ChangeEvent::from_seat(Sequence(1), &seat)
    }

    fn config(buffer_size: usize) -> BroadcasterConfig {
        BroadcasterConfig {
            buffer_size,
            heartbeat_timeout: Duration::from_secs(60),
            reap_interval: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_welcome_on_connect() {
        let broadcaster = Broadcaster::default();
        let handle = broadcaster.connect().unwrap();
        assert!(matches!(
            handle.next_message(WAIT),
            Some(OutboundMessage::Welcome { .. })
        ));
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[test]
    fn test_fan_out_in_order() {
        let broadcaster = Broadcaster::default();
        let a = broadcaster.connect().unwrap();
        let b = broadcaster.connect().unwrap();

        broadcaster.publish(&event("seat-1", SeatStatus::Held)).unwrap();
        let report = broadcaster
            .publish(&event("seat-1", SeatStatus::Confirmed))
            .unwrap();
        assert_eq!(report.delivered, 2);

        for handle in [&a, &b] {
            assert!(matches!(handle.next_message(WAIT), Some(OutboundMessage::Welcome { .. })));
            let statuses: Vec<_> = (0..2)
                .filter_map(|_| match handle.next_message(WAIT) {
                    Some(OutboundMessage::SeatUpdate { seat }) => Some(seat.status),
                    _ => None,
                })
                .collect();
            assert_eq!(statuses, vec![SeatStatus::Held, SeatStatus::Confirmed]);
        }
    }

    #[test]
    fn test_slow_subscriber_does_not_block_others() {
        let broadcaster = Broadcaster::new(config(2));
        let slow = broadcaster.connect().unwrap();
        let fast = broadcaster.connect().unwrap();

        let mut dropped = 0;
        for i in 0..5 {
            let report = broadcaster
                .publish(&event(&format!("seat-{i}"), SeatStatus::Held))
                .unwrap();
            dropped += report.dropped;
            // The fast subscriber keeps draining.
            while fast.try_recv().is_ok() {}
        }

        assert_eq!(dropped, 4);
        assert_eq!(broadcaster.subscriber_count(), 2);
        // Welcome plus the first update fill the slow buffer.
        assert_eq!(slow.receiver.len(), 2);
    }

    #[test]
    fn test_dead_subscriber_removed_on_publish() {
        let broadcaster = Broadcaster::default();
        let alive = broadcaster.connect().unwrap();
        let dead = broadcaster.connect().unwrap();
        drop(dead);

        let report = broadcaster.publish(&event("seat-1", SeatStatus::Held)).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.disconnected, 1);
        assert_eq!(broadcaster.subscriber_count(), 1);
        assert!(broadcaster.disconnect(alive.id));
        assert!(!broadcaster.disconnect(alive.id));
    }

    #[test]
    fn test_ping_keeps_subscriber_alive() {
        let broadcaster = Broadcaster::default();
        let start = Timestamp::from_millis(1_000_000);
        let pinging = broadcaster.connect_at(start).unwrap();
        let silent = broadcaster.connect_at(start).unwrap();

        let later = start.plus(Duration::from_secs(45));
        assert!(broadcaster.receive_at(pinging.id, r#"{"type":"PING"}"#, later));
        assert!(!broadcaster.receive_at(silent.id, r#"{"type":"SUBSCRIBE"}"#, later));
        assert!(!broadcaster.receive_at(silent.id, "not json", later));

        let reaped = broadcaster.reap_idle_at(start.plus(Duration::from_secs(90)));
        assert_eq!(reaped, vec![silent.id]);
        assert_eq!(broadcaster.subscriber_count(), 1);

        let reaped = broadcaster.reap_idle_at(later.plus(Duration::from_secs(61)));
        assert_eq!(reaped, vec![pinging.id]);
    }
}
