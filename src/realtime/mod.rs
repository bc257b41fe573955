//! Realtime seat updates.
//!
//! The [`ChangeTailer`] follows a [`ChangeFeed`](crate::seats::ChangeFeed)
//! and hands each seat change to the [`Broadcaster`], which pushes it to
//! every connected subscriber.

mod broadcaster;
mod tailer;
mod types;

pub use broadcaster::Broadcaster;
pub use tailer::ChangeTailer;
pub use types::{
    BroadcasterConfig, ChangeEvent, DeliveryReport, InboundMessage, OutboundMessage, SubscriberHandle,
    SubscriberId,
};
