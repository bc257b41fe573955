//! Committed batches and the change feed that carries them.

use crate::types::{MapMetadata, Seat, Sequence, Timestamp, Zone};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

/// How a seat row changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    Insert,
    Update,
    Replace,
    Delete,
}

/// One change inside a commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Seat row change. For `Delete` the seat is the row as it was removed.
    Seat { kind: MutationKind, seat: Seat },
    /// Full replacement of a map's zone set.
    Zones { map_id: String, zones: Vec<Zone> },
    /// Map metadata upsert.
    Map(MapMetadata),
}

/// An atomic batch of mutations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub sequence: Sequence,
    pub timestamp: Timestamp,
    pub mutations: Vec<Mutation>,
}

impl Commit {
    /// Seat mutations in this commit, in write order.
    pub fn seat_mutations(&self) -> impl Iterator<Item = (MutationKind, &Seat)> {
        self.mutations.iter().filter_map(|m| match m {
            Mutation::Seat { kind, seat } => Some((*kind, seat)),
            _ => None,
        })
    }
}

/// Source of committed batches, in commit order.
///
/// Every receiver returned by `watch` sees each commit made after the call
/// exactly once. Dropping the receiver unsubscribes.
pub trait ChangeFeed: Send + Sync {
    fn watch(&self) -> Receiver<Commit>;
}
