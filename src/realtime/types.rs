//! Types for realtime seat updates.

use crate::types::{Seat, SeatKey, SeatStatus, Sequence, Timestamp};
use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Broadcaster configuration.
#[derive(Clone, Debug)]
pub struct BroadcasterConfig {
    /// Frames buffered per subscriber before further events are dropped for it.
    pub buffer_size: usize,

    /// A subscriber silent for longer than this is disconnected.
    pub heartbeat_timeout: Duration,

    /// How often idle subscribers are reaped.
    pub reap_interval: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            heartbeat_timeout: Duration::from_secs(60),
            reap_interval: Duration::from_secs(10),
        }
    }
}

/// One observed seat change, carrying the full post-change row.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub sequence: Sequence,
    pub seat_key: SeatKey,
    pub map_id: String,
    pub new_status: SeatStatus,
    pub hold_expires_at: Option<Timestamp>,
    pub seat: Seat,
}

impl ChangeEvent {
    pub fn from_seat(sequence: Sequence, seat: &Seat) -> Self {
        Self {
            sequence,
            seat_key: seat.key(),
            map_id: seat.map_id.clone(),
            new_status: seat.status,
            hold_expires_at: seat.hold_expires_at,
            seat: seat.clone(),
        }
    }
}

/// Frames sent to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    Welcome { message: String },
    SeatUpdate { seat: Seat },
}

/// Frames accepted from subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    Ping,
}

/// Unique identifier for a subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

/// Per-publish delivery counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Subscribers whose buffer was full; they miss this event only.
    pub dropped: usize,
    /// Subscribers found gone and removed.
    pub disconnected: usize,
}

/// Receiving end of one subscriber connection.
///
/// Frames are serialized JSON text, ready for the transport. Dropping the
/// handle disconnects the subscriber at the next publish.
pub struct SubscriberHandle {
    pub id: SubscriberId,
    pub receiver: Receiver<Arc<str>>,
}

impl SubscriberHandle {
    /// Receive the next frame (blocking).
    pub fn recv(&self) -> Result<Arc<str>, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a frame (non-blocking).
    pub fn try_recv(&self) -> Result<Arc<str>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Arc<str>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Receive and decode the next frame, `None` on timeout or garbage.
    pub fn next_message(&self, timeout: Duration) -> Option<OutboundMessage> {
        let frame = self.recv_timeout(timeout).ok()?;
        serde_json::from_str(&frame).ok()
    }
}
