//! Durable seat inventory.
//!
//! Seats, zones and map metadata live in memory tables backed by an
//! append-only commit log. All writes go through [`SeatStore::try_transition`]
//! or one of the map-level operations, each of which produces exactly one
//! [`Commit`].

mod feed;
mod log;
mod store;

pub use feed::{ChangeFeed, Commit, Mutation, MutationKind};
pub use log::CommitLog;
pub use store::{
    CompactionReport, HoldCondition, MapReplacement, ReplacementSummary, SeatStore,
    SeatStoreConfig, Transition, TransitionOutcome,
};
