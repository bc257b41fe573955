//! Core types for seats, zones and maps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Separator between map id and external seat id in storage keys.
pub const KEY_SEPARATOR: &str = "::";

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }

    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis.saturating_mul(1000))
    }

    pub fn plus(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration.as_micros() as i64))
    }

    pub fn minus(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_sub(duration.as_micros() as i64))
    }

    pub fn as_millis(self) -> i64 {
        self.0 / 1000
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Position in the commit log.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }
}

/// Storage identity of a seat: `(map id, external seat id)`.
///
/// Rendered as `{map}::{seat}` in storage and logs. Clients only ever see
/// the bare external id.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeatKey {
    pub map_id: String,
    pub seat_id: String,
}

impl SeatKey {
    pub fn new(map_id: impl Into<String>, seat_id: impl Into<String>) -> Self {
        Self {
            map_id: map_id.into(),
            seat_id: seat_id.into(),
        }
    }

    /// The namespaced storage id.
    pub fn storage_id(&self) -> String {
        format!("{}{}{}", self.map_id, KEY_SEPARATOR, self.seat_id)
    }
}

impl fmt::Debug for SeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeatKey({})", self.storage_id())
    }
}

impl fmt::Display for SeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.map_id, KEY_SEPARATOR, self.seat_id)
    }
}

impl FromStr for SeatKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(KEY_SEPARATOR) {
            Some((map, seat)) if !map.is_empty() && !seat.is_empty() => Ok(SeatKey::new(map, seat)),
            _ => Err(format!("not a seat key: {s}")),
        }
    }
}

/// Reservation status of a seat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Held,
    Confirmed,
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SeatStatus::Available => "available",
            SeatStatus::Held => "held",
            SeatStatus::Confirmed => "confirmed",
        };
        f.write_str(name)
    }
}

/// Whether the source element carried an explicit seat label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeatKind {
    #[default]
    Standard,
    Labeled,
}

/// Canvas coordinates of a seat.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A bookable seat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub map_id: String,
    /// External id as written in the map document (e.g. `seat-A1`).
    pub seat_id: String,
    pub status: SeatStatus,
    /// Set if and only if `status == Held`.
    pub hold_expires_at: Option<Timestamp>,
    pub zone_id: Option<String>,
    pub seat_kind: SeatKind,
    pub position: Option<Position>,
    /// Local name of the element the seat was derived from.
    pub source_tag: String,
}

impl Seat {
    pub fn key(&self) -> SeatKey {
        SeatKey::new(self.map_id.clone(), self.seat_id.clone())
    }

    pub fn is_consistent(&self) -> bool {
        self.hold_expires_at.is_some() == (self.status == SeatStatus::Held)
    }

    /// Whether a hold on this seat has lapsed at `now`.
    pub fn hold_expired(&self, now: Timestamp) -> bool {
        self.status == SeatStatus::Held && self.hold_expires_at.map_or(false, |at| at <= now)
    }
}

/// A named group of seats within one map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub map_id: String,
    pub zone_id: String,
    pub display_name: String,
    /// Always equal to `seat_ids.len()`.
    pub seat_count: usize,
    pub seat_ids: Vec<String>,
}

impl Zone {
    pub fn new(
        map_id: impl Into<String>,
        zone_id: impl Into<String>,
        display_name: impl Into<String>,
        seat_ids: Vec<String>,
    ) -> Self {
        Self {
            map_id: map_id.into(),
            zone_id: zone_id.into(),
            display_name: display_name.into(),
            seat_count: seat_ids.len(),
            seat_ids,
        }
    }
}

/// Canvas dimensions declared on the document root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub view_box: Option<String>,
}

/// Lifecycle of a map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MapStatus {
    #[default]
    Draft,
    Active,
    Archived,
}

/// Map metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMetadata {
    /// File name, doubling as the map id.
    pub file_name: String,
    pub display_name: String,
    pub venue: String,
    pub level: String,
    /// Ordering key among the levels of one venue.
    pub level_order: i32,
    pub dimensions: Dimensions,
    pub total_seats: usize,
    pub zones: Vec<String>,
    pub storage_url: Option<String>,
    pub status: MapStatus,
}

impl MapMetadata {
    /// Draft metadata with only the id known.
    pub fn draft(file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        Self {
            display_name: file_name.clone(),
            file_name,
            venue: String::new(),
            level: String::new(),
            level_order: 0,
            dimensions: Dimensions::default(),
            total_seats: 0,
            zones: Vec::new(),
            storage_url: None,
            status: MapStatus::Draft,
        }
    }
}
