//! Turns committed seat mutations into broadcast events.

use super::broadcaster::Broadcaster;
use super::types::ChangeEvent;
use crate::background::BackgroundTask;
use crate::seats::{ChangeFeed, Commit, MutationKind};
use crossbeam_channel::select;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ChangeTailer;

impl ChangeTailer {
    /// One event per inserted, updated or replaced seat, in commit order.
    pub fn events(commit: &Commit) -> Vec<ChangeEvent> {
        commit
            .seat_mutations()
            .filter(|(kind, _)| *kind != MutationKind::Delete)
            .map(|(_, seat)| ChangeEvent::from_seat(commit.sequence, seat))
            .collect()
    }

    /// Follow `feed` and publish every event until the task is stopped or
    /// the feed closes.
    pub fn spawn(feed: &dyn ChangeFeed, broadcaster: Arc<Broadcaster>) -> std::io::Result<BackgroundTask> {
        let commits = feed.watch();

        BackgroundTask::spawn("change-tailer", move |shutdown| loop {
            select! {
                recv(commits) -> commit => {
                    let Ok(commit) = commit else {
                        debug!("Change feed closed");
                        break;
                    };
                    for event in Self::events(&commit) {
                        if let Err(e) = broadcaster.publish(&event) {
                            warn!(seat = %event.seat_key, error = %e, "Failed to publish seat update");
                        }
                    }
                }
                recv(shutdown) -> _ => break,
            }
        })
    }
}
