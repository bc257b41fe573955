//! Map registration: turning a document into bookable inventory.
//!
//! Registration replaces inventory, it does not merge. Every held or
//! confirmed seat of a re-registered map returns to `available`, and seats
//! missing from the new document are deleted. `RegistrationResult::bookings_reset`
//! reports how many bookings that discarded.

use crate::document::{analyze, validate, AnalysisReport, ValidationIssue};
use crate::documents::{validate_name, DocumentStore};
use crate::error::{Result, VenueError};
use crate::seats::{MapReplacement, SeatStore};
use crate::types::{MapMetadata, MapStatus, Seat, SeatStatus, Zone};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a successful registration.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResult {
    pub map_id: String,
    pub report: AnalysisReport,
    pub seats_inserted: usize,
    pub seats_replaced: usize,
    pub seats_removed: usize,
    pub bookings_reset: usize,
}

/// A new or updated map document with its descriptive metadata.
#[derive(Clone, Debug, Default)]
pub struct UploadRequest {
    pub file_name: String,
    pub display_name: Option<String>,
    pub venue: Option<String>,
    pub level: Option<String>,
    pub level_order: Option<i32>,
    pub document: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub url: String,
    pub registration: RegistrationResult,
}

pub struct MapRegistrar {
    store: Arc<SeatStore>,
    documents: Arc<dyn DocumentStore>,
}

impl MapRegistrar {
    pub fn new(store: Arc<SeatStore>, documents: Arc<dyn DocumentStore>) -> Self {
        Self { store, documents }
    }

    /// Validate and analyse `text`, then atomically replace the map's
    /// seats and zones and promote it to `active`.
    ///
    /// On any failure the map's previous inventory is left untouched.
    pub fn register(&self, map_id: &str, text: &str) -> Result<RegistrationResult> {
        self.register_with(map_id, text, |_| {})
    }

    /// Registration with caller edits applied to the map metadata before it
    /// is committed together with the new inventory.
    fn register_with(
        &self,
        map_id: &str,
        text: &str,
        edit: impl FnOnce(&mut MapMetadata),
    ) -> Result<RegistrationResult> {
        validate_name(map_id)?;

        let validated = validate(text)?;
        let report = analyze(&validated.document);

        let seats: Vec<Seat> = report
            .seats
            .iter()
            .map(|parsed| Seat {
                map_id: map_id.to_string(),
                seat_id: parsed.seat_id.clone(),
                status: SeatStatus::Available,
                hold_expires_at: None,
                zone_id: parsed.zone.clone(),
                seat_kind: parsed.kind(),
                position: parsed.position,
                source_tag: parsed.tag_name.clone(),
            })
            .collect();

        let zones: Vec<Zone> = report
            .zones
            .iter()
            .map(|zone| {
                Zone::new(
                    map_id,
                    zone.zone_id.clone(),
                    zone.zone_name.clone(),
                    zone.seat_ids.clone(),
                )
            })
            .collect();

        let mut metadata = self
            .store
            .map(map_id)
            .unwrap_or_else(|| MapMetadata::draft(map_id));
        metadata.dimensions = report.dimensions.clone();
        metadata.total_seats = report.total_seats;
        metadata.zones = report.zones.iter().map(|z| z.zone_id.clone()).collect();
        metadata.status = MapStatus::Active;
        edit(&mut metadata);

        let summary = self.store.replace_map(
            map_id,
            MapReplacement {
                seats,
                zones,
                metadata,
            },
        )?;

        if summary.bookings_reset > 0 {
            warn!(
                map_id,
                bookings_reset = summary.bookings_reset,
                "Re-registration discarded existing bookings"
            );
        }
        info!(
            map_id,
            seats = report.total_seats,
            zones = report.zones.len(),
            warnings = report.warnings.len(),
            "Registered map"
        );

        Ok(RegistrationResult {
            map_id: map_id.to_string(),
            report,
            seats_inserted: summary.inserted,
            seats_replaced: summary.replaced,
            seats_removed: summary.removed,
            bookings_reset: summary.bookings_reset,
        })
    }

    /// Validate and store the sanitized document, then register it with the
    /// request's metadata in the same commit as the inventory.
    pub fn upload(&self, request: UploadRequest) -> Result<UploadResult> {
        validate_name(&request.file_name)?;
        let validated = validate(&request.document)?;

        let url = self
            .documents
            .put(&request.file_name, validated.sanitized.as_bytes())?;

        let UploadRequest {
            file_name,
            display_name,
            venue,
            level,
            level_order,
            ..
        } = request;
        let storage_url = url.clone();
        let registration = self.register_with(&file_name, &validated.sanitized, |metadata| {
            if let Some(display_name) = display_name {
                metadata.display_name = display_name;
            }
            if let Some(venue) = venue {
                metadata.venue = venue;
            }
            if let Some(level) = level {
                metadata.level = level;
            }
            if let Some(level_order) = level_order {
                metadata.level_order = level_order;
            }
            metadata.storage_url = Some(storage_url);
        })?;
        Ok(UploadResult { url, registration })
    }

    /// Register the stored document for `map_id` again.
    pub fn reregister(&self, map_id: &str) -> Result<RegistrationResult> {
        let bytes = self.documents.get(map_id)?;
        let text = String::from_utf8(bytes).map_err(|e| ValidationIssue::Malformed {
            message: e.to_string(),
        })?;
        self.register(map_id, &text)
    }

    /// Take a map out of service. Its inventory is kept.
    pub fn archive(&self, map_id: &str) -> Result<MapMetadata> {
        let metadata = self.store.set_map_status(map_id, MapStatus::Archived)?;
        info!(map_id, "Archived map");
        Ok(metadata)
    }

    /// Archive a map and delete its stored document.
    pub fn remove(&self, map_id: &str) -> Result<MapMetadata> {
        let metadata = self.archive(map_id)?;
        if !self.documents.delete(map_id)? {
            warn!(map_id, "No stored document to delete");
        }
        Ok(metadata)
    }

    /// Metadata for `map_id`, or `MapNotFound`.
    pub fn map(&self, map_id: &str) -> Result<MapMetadata> {
        self.store
            .map(map_id)
            .ok_or_else(|| VenueError::MapNotFound(map_id.to_string()))
    }
}
