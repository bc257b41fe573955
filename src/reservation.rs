//! Seat reservation state machine.
//!
//! ```text
//! available --hold--> held --confirm--> confirmed
//!     ^                 |
//!     +--release/expire-+
//! ```
//!
//! Every transition is a single [`SeatStore::try_transition`] call. Two
//! callers racing on the same seat are resolved by whichever write lands
//! first; the loser gets a typed error, never a lost update.

use crate::background::BackgroundTask;
use crate::error::{Result, VenueError};
use crate::seats::{SeatStore, Transition, TransitionOutcome};
use crate::types::{Seat, SeatKey, SeatStatus, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reservation configuration.
#[derive(Clone, Debug)]
pub struct ReservationConfig {
    /// How long a hold lasts before it may be swept.
    pub hold_duration: Duration,

    /// How often the expiry sweep runs.
    pub sweep_interval: Duration,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            hold_duration: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(15),
        }
    }
}

/// Result of one expiry sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Lapsed holds found.
    pub examined: usize,
    /// Holds returned to `available`.
    pub expired: usize,
    /// Holds that changed before the sweep could write (confirmed or released).
    pub lost_races: usize,
}

pub struct ReservationEngine {
    store: Arc<SeatStore>,
    config: ReservationConfig,
}

impl ReservationEngine {
    pub fn new(store: Arc<SeatStore>, config: ReservationConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ReservationConfig {
        &self.config
    }

    /// `available -> held` for `hold_duration`.
    ///
    /// Fails with `Conflict` if the seat is held or confirmed, `NotFound` if
    /// it does not exist.
    pub fn hold(&self, map_id: &str, seat_id: &str) -> Result<Seat> {
        self.hold_at(map_id, seat_id, Timestamp::now())
    }

    pub fn hold_at(&self, map_id: &str, seat_id: &str, now: Timestamp) -> Result<Seat> {
        let key = SeatKey::new(map_id, seat_id);
        let until = now.plus(self.config.hold_duration);

        match self.store.try_transition(&key, Transition::hold(until))? {
            TransitionOutcome::Applied(seat) => {
                debug!(seat = %key, "Seat held");
                Ok(seat)
            }
            TransitionOutcome::NotApplicable { current: None } => Err(VenueError::NotFound(key)),
            TransitionOutcome::NotApplicable { current: Some(status) } => {
                debug!(seat = %key, %status, "Hold lost");
                Err(VenueError::Conflict(key))
            }
        }
    }

    /// `held -> confirmed`.
    ///
    /// Fails with `NotFound` unless the seat holds a live hold.
    pub fn confirm(&self, map_id: &str, seat_id: &str) -> Result<Seat> {
        self.confirm_at(map_id, seat_id, Timestamp::now())
    }

    pub fn confirm_at(&self, map_id: &str, seat_id: &str, now: Timestamp) -> Result<Seat> {
        let key = SeatKey::new(map_id, seat_id);

        match self.store.try_transition(&key, Transition::confirm(now))? {
            TransitionOutcome::Applied(seat) => {
                debug!(seat = %key, "Seat confirmed");
                Ok(seat)
            }
            TransitionOutcome::NotApplicable { .. } => Err(VenueError::NotFound(key)),
        }
    }

    /// `held -> available`.
    ///
    /// Fails with `InvalidState` for a confirmed seat, `NotFound` otherwise.
    pub fn release(&self, map_id: &str, seat_id: &str) -> Result<Seat> {
        let key = SeatKey::new(map_id, seat_id);

        match self.store.try_transition(&key, Transition::release())? {
            TransitionOutcome::Applied(seat) => {
                debug!(seat = %key, "Seat released");
                Ok(seat)
            }
            TransitionOutcome::NotApplicable {
                current: Some(SeatStatus::Confirmed),
            } => Err(VenueError::InvalidState {
                key,
                status: SeatStatus::Confirmed,
            }),
            TransitionOutcome::NotApplicable { .. } => Err(VenueError::NotFound(key)),
        }
    }

    /// Return every hold that lapsed at `now` to `available`.
    pub fn sweep_expired_at(&self, now: Timestamp) -> Result<SweepSummary> {
        let candidates = self.store.expired_holds(now);
        let mut summary = SweepSummary {
            examined: candidates.len(),
            ..Default::default()
        };

        for key in candidates {
            match self.store.try_transition(&key, Transition::expire(now))? {
                TransitionOutcome::Applied(_) => summary.expired += 1,
                TransitionOutcome::NotApplicable { .. } => summary.lost_races += 1,
            }
        }

        if summary.expired > 0 || summary.lost_races > 0 {
            info!(
                expired = summary.expired,
                lost_races = summary.lost_races,
                "Swept lapsed holds"
            );
        }
        Ok(summary)
    }

    pub fn sweep_expired(&self) -> Result<SweepSummary> {
        self.sweep_expired_at(Timestamp::now())
    }

    /// Run the expiry sweep every `sweep_interval` on a background thread.
    pub fn spawn_sweeper(self: &Arc<Self>) -> std::io::Result<BackgroundTask> {
        let engine = Arc::clone(self);
        BackgroundTask::spawn_periodic("hold-sweeper", self.config.sweep_interval, move || {
            if let Err(e) = engine.sweep_expired() {
                warn!(error = %e, "Hold sweep failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::seats::{MapReplacement, SeatStoreConfig};
    use crate::types::{MapMetadata, SeatKind, Zone};
    use tempfile::TempDir;

    fn engine(dir: &TempDir, seat_ids: &[&str]) -> ReservationEngine {
        let store = SeatStore::open(SeatStoreConfig {
            path: dir.path().join("store"),
            create_if_missing: true,
            sync_every_commit: false,
        })
        .unwrap();

        let seats = seat_ids
            .iter()
            .map(|id| Seat {
                map_id: "hall".into(),
                seat_id: id.to_string(),
                status: SeatStatus::Available,
                hold_expires_at: None,
                zone_id: None,
                seat_kind: SeatKind::Standard,
                position: None,
                source_tag: "rect".into(),
            })
            .collect();
        store
            .replace_map(
                "hall",
                MapReplacement {
                    seats,
                    zones: Vec::<Zone>::new(),
                    metadata: MapMetadata::draft("hall"),
                },
            )
            .unwrap();

        ReservationEngine::new(Arc::new(store), ReservationConfig::default())
    }

    #[test]
    fn test_hold_stamps_expiry() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, &["seat-1"]);
        let now = Timestamp::from_millis(1_000_000);

        let seat = engine.hold_at("hall", "seat-1", now).unwrap();
        assert_eq!(seat.status, SeatStatus::Held);
        assert_eq!(
            seat.hold_expires_at,
            Some(now.plus(Duration::from_secs(300)))
        );
        assert!(seat.is_consistent());
    }

    #[test]
    fn test_hold_conflicts() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, &["seat-1"]);

        engine.hold("hall", "seat-1").unwrap();
        let err = engine.hold("hall", "seat-1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        engine.confirm("hall", "seat-1").unwrap();
        let err = engine.hold("hall", "seat-1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = engine.hold("hall", "seat-404").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_confirm_and_release_matrix() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, &["seat-1", "seat-2"]);

        // Not held.
        assert_eq!(
            engine.confirm("hall", "seat-1").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            engine.release("hall", "seat-1").unwrap_err().kind(),
            ErrorKind::NotFound
        );

        engine.hold("hall", "seat-1").unwrap();
        let released = engine.release("hall", "seat-1").unwrap();
        assert_eq!(released.status, SeatStatus::Available);
        assert_eq!(released.hold_expires_at, None);

        engine.hold("hall", "seat-2").unwrap();
        engine.confirm("hall", "seat-2").unwrap();
        assert!(matches!(
            engine.release("hall", "seat-2"),
            Err(VenueError::InvalidState {
                status: SeatStatus::Confirmed,
                ..
            })
        ));
        assert_eq!(
            engine.confirm("hall", "seat-2").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_sweep_then_confirm_fails() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, &["seat-1", "seat-2"]);
        let start = Timestamp::from_millis(1_000_000);

        engine.hold_at("hall", "seat-1", start).unwrap();
        let later = start.plus(Duration::from_secs(60));
        engine.hold_at("hall", "seat-2", later).unwrap();

        let after_first = start.plus(Duration::from_secs(301));
        let summary = engine.sweep_expired_at(after_first).unwrap();
        assert_eq!(
            summary,
            SweepSummary {
                examined: 1,
                expired: 1,
                lost_races: 0
            }
        );

        assert_eq!(
            engine
                .confirm_at("hall", "seat-1", after_first)
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
        // The fresher hold survives the sweep and can still be confirmed.
        engine.confirm_at("hall", "seat-2", after_first).unwrap();
    }

    #[test]
    fn test_confirm_after_lapse_before_sweep() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, &["seat-1"]);
        let start = Timestamp::from_millis(1_000_000);

        engine.hold_at("hall", "seat-1", start).unwrap();
        let lapsed = start.plus(Duration::from_secs(300));
        assert_eq!(
            engine
                .confirm_at("hall", "seat-1", lapsed)
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(engine.sweep_expired_at(lapsed).unwrap().expired, 1);
    }
}
