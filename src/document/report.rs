//! Analysis report produced for every parsed map document.

use crate::types::{Dimensions, Position, SeatKind};
use serde::{Deserialize, Serialize};

/// A seat found in the document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedSeat {
    pub seat_id: String,
    /// Local name of the element carrying the id.
    pub tag_name: String,
    pub zone: Option<String>,
    pub zone_name: Option<String>,
    pub position: Option<Position>,
    /// Value of a `data-seat` label, if present.
    pub data_seat: Option<String>,
}

impl ParsedSeat {
    pub fn kind(&self) -> SeatKind {
        if self.data_seat.is_some() {
            SeatKind::Labeled
        } else {
            SeatKind::Standard
        }
    }
}

/// Seats grouped under one zone, in first-seen order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedZone {
    pub zone_id: String,
    pub zone_name: String,
    pub seat_count: usize,
    pub seat_ids: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    DuplicateId,
    SeatNoZone,
    SeatNoPosition,
}

/// Non-fatal finding about the document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisWarning {
    #[serde(rename = "type")]
    pub kind: WarningKind,
    pub message: String,
    pub seat_id: Option<String>,
}

impl AnalysisWarning {
    pub(crate) fn duplicate_id(seat_id: &str) -> Self {
        Self {
            kind: WarningKind::DuplicateId,
            message: format!("duplicate seat id: {seat_id}"),
            seat_id: Some(seat_id.to_string()),
        }
    }

    pub(crate) fn seat_no_zone(seat_id: &str) -> Self {
        Self {
            kind: WarningKind::SeatNoZone,
            message: format!("seat has no zone: {seat_id}"),
            seat_id: Some(seat_id.to_string()),
        }
    }

    pub(crate) fn seat_no_position(seat_id: &str) -> Self {
        Self {
            kind: WarningKind::SeatNoPosition,
            message: format!("could not determine position for: {seat_id}"),
            seat_id: Some(seat_id.to_string()),
        }
    }
}

/// Everything learned from one document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub dimensions: Dimensions,
    pub total_seats: usize,
    pub seats: Vec<ParsedSeat>,
    pub zones: Vec<DetectedZone>,
    pub seats_without_zone: Vec<String>,
    pub warnings: Vec<AnalysisWarning>,
}

impl AnalysisReport {
    pub fn warnings_of(&self, kind: WarningKind) -> impl Iterator<Item = &AnalysisWarning> {
        self.warnings.iter().filter(move |w| w.kind == kind)
    }

    pub fn zone(&self, zone_id: &str) -> Option<&DetectedZone> {
        self.zones.iter().find(|z| z.zone_id == zone_id)
    }

    pub fn seat(&self, seat_id: &str) -> Option<&ParsedSeat> {
        self.seats.iter().find(|s| s.seat_id == seat_id)
    }
}
