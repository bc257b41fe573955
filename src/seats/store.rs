//! Durable seat, zone and map tables with a conditional write primitive.

use super::feed::{ChangeFeed, Commit, Mutation, MutationKind};
use super::log::CommitLog;
use crate::error::{Result, VenueError};
use crate::types::{
    MapMetadata, MapStatus, Seat, SeatKey, SeatStatus, Sequence, Timestamp, Zone,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"STS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const LOG_FILE: &str = "commits.log";

/// Seat store configuration.
#[derive(Clone, Debug)]
pub struct SeatStoreConfig {
    /// Directory holding the manifest, lock file and commit log.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync the log after every commit.
    pub sync_every_commit: bool,
}

impl Default for SeatStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./seats"),
            create_if_missing: true,
            sync_every_commit: true,
        }
    }
}

/// Extra predicate on a held seat's expiry, evaluated inside the write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HoldCondition {
    Any,
    /// The hold must still be live at the given instant.
    Unexpired(Timestamp),
    /// The hold must have lapsed at the given instant.
    Expired(Timestamp),
}

impl HoldCondition {
    fn admits(&self, seat: &Seat) -> bool {
        match self {
            HoldCondition::Any => true,
            HoldCondition::Unexpired(now) => !seat.hold_expired(*now),
            HoldCondition::Expired(now) => seat.hold_expired(*now),
        }
    }
}

/// A status change that applies only if the seat is currently in `from`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: SeatStatus,
    pub to: SeatStatus,
    pub hold_until: Option<Timestamp>,
    pub condition: HoldCondition,
}

impl Transition {
    /// `available -> held` until the given instant.
    pub fn hold(until: Timestamp) -> Self {
        Self {
            from: SeatStatus::Available,
            to: SeatStatus::Held,
            hold_until: Some(until),
            condition: HoldCondition::Any,
        }
    }

    /// `held -> confirmed`, only while the hold is live at `now`.
    pub fn confirm(now: Timestamp) -> Self {
        Self {
            from: SeatStatus::Held,
            to: SeatStatus::Confirmed,
            hold_until: None,
            condition: HoldCondition::Unexpired(now),
        }
    }

    /// `held -> available`.
    pub fn release() -> Self {
        Self {
            from: SeatStatus::Held,
            to: SeatStatus::Available,
            hold_until: None,
            condition: HoldCondition::Any,
        }
    }

    /// `held -> available`, only if the hold has lapsed at `now`.
    pub fn expire(now: Timestamp) -> Self {
        Self::release().when(HoldCondition::Expired(now))
    }

    pub fn when(mut self, condition: HoldCondition) -> Self {
        self.condition = condition;
        self
    }

    fn admits(&self, seat: &Seat) -> bool {
        seat.status == self.from && self.condition.admits(seat)
    }
}

/// Result of a conditional transition.
#[derive(Clone, Debug, PartialEq)]
pub enum TransitionOutcome {
    /// The write happened; carries the post-write seat.
    Applied(Seat),
    /// The guard failed. `current` is the status seen at write time, `None`
    /// if the seat does not exist.
    NotApplicable { current: Option<SeatStatus> },
}

/// New inventory for one map, written as a single commit.
#[derive(Clone, Debug)]
pub struct MapReplacement {
    pub seats: Vec<Seat>,
    pub zones: Vec<Zone>,
    pub metadata: MapMetadata,
}

/// What a map replacement did to the previous inventory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplacementSummary {
    pub inserted: usize,
    pub replaced: usize,
    pub removed: usize,
    /// Previously held or confirmed seats whose booking was discarded.
    pub bookings_reset: usize,
}

/// Outcome of a log compaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactionReport {
    pub seats: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

#[derive(Default)]
struct Tables {
    seats: BTreeMap<SeatKey, Seat>,
    zones: HashMap<String, Vec<Zone>>,
    maps: HashMap<String, MapMetadata>,
    sequence: Sequence,
}

impl Tables {
    fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::Seat {
                kind: MutationKind::Delete,
                seat,
            } => {
                self.seats.remove(&seat.key());
            }
            Mutation::Seat { seat, .. } => {
                self.seats.insert(seat.key(), seat.clone());
            }
            Mutation::Zones { map_id, zones } => {
                self.zones.insert(map_id.clone(), zones.clone());
            }
            Mutation::Map(metadata) => {
                self.maps
                    .insert(metadata.file_name.clone(), metadata.clone());
            }
        }
    }

    fn seats_of<'a>(&'a self, map_id: &str) -> impl Iterator<Item = &'a Seat> + 'a {
        let map_id = map_id.to_string();
        self.seats
            .range(SeatKey::new(map_id.clone(), "")..)
            .take_while(move |(key, _)| key.map_id == map_id)
            .map(|(_, seat)| seat)
    }
}

/// The seat store.
///
/// Every write is one commit: appended to the log, applied to the tables,
/// then published to watchers, all while holding the table write lock.
/// Readers never observe a half-applied commit.
pub struct SeatStore {
    path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,

    log: CommitLog,

    tables: RwLock<Tables>,

    watchers: Mutex<Vec<Sender<Commit>>>,
}

impl SeatStore {
    /// Open an existing store or create a new one.
    pub fn open(config: SeatStoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::verify_manifest(&config.path)?;
        } else if config.create_if_missing {
            fs::create_dir_all(&config.path)?;
            Self::write_manifest(&config.path)?;
        } else {
            return Err(VenueError::NotInitialized);
        }

        let lock_file = Self::acquire_lock(&config.path)?;

        let (log, commits) =
            CommitLog::open(config.path.join(LOG_FILE), config.sync_every_commit)?;

        let mut tables = Tables::default();
        for commit in &commits {
            for mutation in &commit.mutations {
                tables.apply(mutation);
            }
            tables.sequence = commit.sequence;
        }

        info!(
            path = %config.path.display(),
            commits = commits.len(),
            seats = tables.seats.len(),
            maps = tables.maps.len(),
            "Opened seat store"
        );

        Ok(Self {
            path: config.path,
            _lock_file: lock_file,
            log,
            tables: RwLock::new(tables),
            watchers: Mutex::new(Vec::new()),
        })
    }

    /// Atomically apply `transition` if its guard holds at write time.
    ///
    /// The check and the write happen under one lock, so of any number of
    /// concurrent callers racing for the same guard at most one is applied.
    pub fn try_transition(&self, key: &SeatKey, transition: Transition) -> Result<TransitionOutcome> {
        let mut tables = self.tables.write();

        let Some(seat) = tables.seats.get(key) else {
            return Ok(TransitionOutcome::NotApplicable { current: None });
        };
        if !transition.admits(seat) {
            return Ok(TransitionOutcome::NotApplicable {
                current: Some(seat.status),
            });
        }

        let mut updated = seat.clone();
        updated.status = transition.to;
        updated.hold_expires_at = match transition.to {
            SeatStatus::Held => transition.hold_until,
            _ => None,
        };

        self.commit(
            &mut tables,
            vec![Mutation::Seat {
                kind: MutationKind::Update,
                seat: updated.clone(),
            }],
        )?;

        Ok(TransitionOutcome::Applied(updated))
    }

    pub fn get(&self, key: &SeatKey) -> Option<Seat> {
        self.tables.read().seats.get(key).cloned()
    }

    /// Seats in key order, optionally restricted to one map.
    pub fn list(&self, map_id: Option<&str>) -> Vec<Seat> {
        let tables = self.tables.read();
        match map_id {
            Some(map_id) => tables.seats_of(map_id).cloned().collect(),
            None => tables.seats.values().cloned().collect(),
        }
    }

    /// Held seats whose hold has lapsed at `now`.
    pub fn expired_holds(&self, now: Timestamp) -> Vec<SeatKey> {
        self.tables
            .read()
            .seats
            .values()
            .filter(|seat| seat.hold_expired(now))
            .map(Seat::key)
            .collect()
    }

    pub fn zones(&self, map_id: &str) -> Vec<Zone> {
        self.tables
            .read()
            .zones
            .get(map_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn map(&self, map_id: &str) -> Option<MapMetadata> {
        self.tables.read().maps.get(map_id).cloned()
    }

    /// All maps ordered by venue, level order, then file name.
    pub fn maps(&self) -> Vec<MapMetadata> {
        let mut maps: Vec<_> = self.tables.read().maps.values().cloned().collect();
        maps.sort_by(|a, b| {
            (&a.venue, a.level_order, &a.file_name).cmp(&(&b.venue, b.level_order, &b.file_name))
        });
        maps
    }

    pub fn upsert_map(&self, metadata: MapMetadata) -> Result<()> {
        let mut tables = self.tables.write();
        self.commit(&mut tables, vec![Mutation::Map(metadata)])?;
        Ok(())
    }

    pub fn set_map_status(&self, map_id: &str, status: MapStatus) -> Result<MapMetadata> {
        let mut tables = self.tables.write();
        let mut metadata = tables
            .maps
            .get(map_id)
            .cloned()
            .ok_or_else(|| VenueError::MapNotFound(map_id.to_string()))?;
        metadata.status = status;
        self.commit(&mut tables, vec![Mutation::Map(metadata.clone())])?;
        Ok(metadata)
    }

    /// Replace a map's seats, zones and metadata in one commit.
    ///
    /// Seats present before but absent from `replacement` are deleted. Every
    /// surviving seat takes the state given in `replacement`.
    pub fn replace_map(&self, map_id: &str, replacement: MapReplacement) -> Result<ReplacementSummary> {
        let mut tables = self.tables.write();

        let previous: HashMap<SeatKey, SeatStatus> = tables
            .seats_of(map_id)
            .map(|seat| (seat.key(), seat.status))
            .collect();

        let mut summary = ReplacementSummary::default();
        let mut mutations = Vec::with_capacity(replacement.seats.len() + 2);
        let mut kept = HashSet::with_capacity(replacement.seats.len());

        for seat in replacement.seats {
            let key = seat.key();
            let kind = match previous.get(&key) {
                Some(status) => {
                    summary.replaced += 1;
                    if *status != SeatStatus::Available {
                        summary.bookings_reset += 1;
                    }
                    MutationKind::Replace
                }
                None => {
                    summary.inserted += 1;
                    MutationKind::Insert
                }
            };
            kept.insert(key);
            mutations.push(Mutation::Seat { kind, seat });
        }

        for seat in tables.seats_of(map_id) {
            if kept.contains(&seat.key()) {
                continue;
            }
            summary.removed += 1;
            if seat.status != SeatStatus::Available {
                summary.bookings_reset += 1;
            }
            mutations.push(Mutation::Seat {
                kind: MutationKind::Delete,
                seat: seat.clone(),
            });
        }

        mutations.push(Mutation::Zones {
            map_id: map_id.to_string(),
            zones: replacement.zones,
        });
        mutations.push(Mutation::Map(replacement.metadata));

        self.commit(&mut tables, mutations)?;

        debug!(
            map_id,
            inserted = summary.inserted,
            replaced = summary.replaced,
            removed = summary.removed,
            "Replaced map inventory"
        );
        Ok(summary)
    }

    /// Rewrite the log as a single snapshot commit of the current tables.
    ///
    /// Watchers are not notified; nothing observable changes.
    pub fn compact(&self) -> Result<CompactionReport> {
        let tables = self.tables.write();
        let bytes_before = self.log.size()?;

        let mut mutations: Vec<Mutation> = Vec::new();
        mutations.extend(tables.maps.values().cloned().map(Mutation::Map));
        mutations.extend(tables.zones.iter().map(|(map_id, zones)| Mutation::Zones {
            map_id: map_id.clone(),
            zones: zones.clone(),
        }));
        mutations.extend(tables.seats.values().cloned().map(|seat| Mutation::Seat {
            kind: MutationKind::Insert,
            seat,
        }));

        if mutations.is_empty() {
            self.log.rewrite(&[])?;
        } else {
            self.log.rewrite(&[Commit {
                sequence: tables.sequence,
                timestamp: Timestamp::now(),
                mutations,
            }])?;
        }

        let report = CompactionReport {
            seats: tables.seats.len(),
            bytes_before,
            bytes_after: self.log.size()?,
        };
        info!(
            seats = report.seats,
            bytes_before = report.bytes_before,
            bytes_after = report.bytes_after,
            "Compacted commit log"
        );
        Ok(report)
    }

    /// Sequence of the last commit.
    pub fn sequence(&self) -> Sequence {
        self.tables.read().sequence
    }

    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn commit(&self, tables: &mut Tables, mutations: Vec<Mutation>) -> Result<Commit> {
        let commit = Commit {
            sequence: tables.sequence.next(),
            timestamp: Timestamp::now(),
            mutations,
        };

        self.log.append(&commit)?;

        for mutation in &commit.mutations {
            tables.apply(mutation);
        }
        tables.sequence = commit.sequence;

        self.watchers
            .lock()
            .retain(|watcher| watcher.send(commit.clone()).is_ok());

        Ok(commit)
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(VenueError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(VenueError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| VenueError::Locked)?;
        Ok(lock_file)
    }
}

impl ChangeFeed for SeatStore {
    fn watch(&self) -> Receiver<Commit> {
        let (tx, rx) = unbounded();
        self.watchers.lock().push(tx);
        rx
    }
}

impl Drop for SeatStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}
