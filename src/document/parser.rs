//! Seat, zone and position extraction from a sanitized map document.

use super::report::{AnalysisReport, AnalysisWarning, DetectedZone, ParsedSeat};
use super::{leading_number, read_dimensions, ValidationIssue};
use crate::error::Result;
use crate::markup::{Document, Element, NodeId};
use crate::types::Position;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Ids starting with this prefix name seats.
pub const SEAT_PREFIX: &str = "seat-";

const ZONE_TAG: &str = "g";
const LABEL_TAG: &str = "text";
const SHAPE_TAGS: [&str; 5] = ["circle", "rect", "ellipse", "path", "polygon"];

fn auxiliary_suffix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"_\d+$").expect("valid suffix pattern"))
}

fn move_to() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)m\s*(-?\d*\.?\d+)(?:(?:\s*,\s*|\s+)(-?\d*\.?\d+)|(-\d*\.?\d+))")
            .expect("valid move-to pattern")
    })
}

pub fn is_seat_id(id: &str) -> bool {
    id.starts_with(SEAT_PREFIX)
}

/// Authoring tools export copies of a seat as `seat-X_2`, `seat-X_3`, ...
pub fn is_auxiliary_duplicate(id: &str) -> bool {
    auxiliary_suffix().is_match(id)
}

/// Parse markup text and analyse it.
///
/// Fails only when the text is not well-formed markup.
pub fn parse(text: &str) -> Result<AnalysisReport> {
    let document = Document::parse(text).map_err(|e| ValidationIssue::Malformed {
        message: e.to_string(),
    })?;
    Ok(analyze(&document))
}

/// Analyse an already parsed document.
pub fn analyze(document: &Document) -> AnalysisReport {
    let dimensions = read_dimensions(document.root_element());

    let mut seen: HashSet<&str> = HashSet::new();
    let mut seats: Vec<ParsedSeat> = Vec::new();
    let mut warnings = Vec::new();

    for (node, element) in document.elements() {
        let Some(id) = element.attribute("id") else {
            continue;
        };
        if !is_seat_id(id) || is_auxiliary_duplicate(id) {
            continue;
        }
        if !seen.insert(id) {
            warnings.push(AnalysisWarning::duplicate_id(id));
            continue;
        }

        let zone = resolve_zone(document, node);
        seats.push(ParsedSeat {
            seat_id: id.to_string(),
            tag_name: element.local_name().to_string(),
            zone: zone.as_ref().map(|z| z.0.clone()),
            zone_name: zone.map(|z| z.1),
            position: extract_position(document, node),
            data_seat: element.attribute("data-seat").map(str::to_string),
        });
    }

    let zones = aggregate_zones(&seats);

    let seats_without_zone: Vec<String> = seats
        .iter()
        .filter(|s| s.zone.is_none())
        .map(|s| s.seat_id.clone())
        .collect();
    warnings.extend(seats_without_zone.iter().map(|id| AnalysisWarning::seat_no_zone(id)));
    warnings.extend(
        seats
            .iter()
            .filter(|s| s.position.is_none())
            .map(|s| AnalysisWarning::seat_no_position(&s.seat_id)),
    );

    AnalysisReport {
        dimensions,
        total_seats: seats.len(),
        seats,
        zones,
        seats_without_zone,
        warnings,
    }
}

/// Outermost ancestor `<g>` with a non-seat id, as `(zone id, display name)`.
fn resolve_zone(document: &Document, node: NodeId) -> Option<(String, String)> {
    let mut outermost: Option<(NodeId, &str)> = None;
    for ancestor in document.ancestors(node) {
        let Some(element) = document.element(ancestor) else {
            continue;
        };
        if element.local_name() != ZONE_TAG {
            continue;
        }
        match element.attribute("id") {
            Some(id) if !id.is_empty() && !is_seat_id(id) => outermost = Some((ancestor, id)),
            _ => {}
        }
    }

    outermost.map(|(group, id)| {
        let name = zone_label(document, group).unwrap_or_else(|| clean_zone_name(id));
        (id.to_string(), name)
    })
}

/// First non-empty `<text>` directly inside the group.
fn zone_label(document: &Document, group: NodeId) -> Option<String> {
    document
        .child_elements(group)
        .filter(|(_, el)| el.local_name() == LABEL_TAG)
        .map(|(id, _)| document.text_content(id).trim().to_string())
        .find(|label| !label.is_empty())
}

/// `etapa-vip` -> `Etapa Vip`, `zona_b` -> `Zona B`, `zonaA` -> `ZonaA`.
pub fn clean_zone_name(raw: &str) -> String {
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';

    let mut out = String::with_capacity(raw.len());
    let mut previous_is_word = false;
    for c in raw.chars().map(|c| if c == '-' || c == '_' { ' ' } else { c }) {
        if !previous_is_word && is_word(c) {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
        previous_is_word = is_word(c);
    }
    out.trim().to_string()
}

fn extract_position(document: &Document, node: NodeId) -> Option<Position> {
    let mut current = node;
    loop {
        let element = document.element(current)?;
        match element.local_name() {
            "circle" | "ellipse" => return point(element, "cx", "cy"),
            "rect" => return point(element, "x", "y"),
            tag @ ("g" | "path" | "polygon") => {
                let shape = document
                    .child_elements(current)
                    .find(|(_, child)| SHAPE_TAGS.contains(&child.local_name()));
                if let Some((child, _)) = shape {
                    current = child;
                    continue;
                }
                if tag == "path" {
                    return element.attribute("d").and_then(first_move_to);
                }
                return None;
            }
            _ => return None,
        }
    }
}

fn point(element: &Element, x_attr: &str, y_attr: &str) -> Option<Position> {
    let x = element.attribute(x_attr).and_then(leading_number);
    let y = element.attribute(y_attr).and_then(leading_number);
    if x.is_none() && y.is_none() {
        return None;
    }
    Some(Position {
        x: x.unwrap_or(0.0),
        y: y.unwrap_or(0.0),
    })
}

fn first_move_to(path_data: &str) -> Option<Position> {
    let captures = move_to().captures(path_data)?;
    let x = captures.get(1)?.as_str().parse().ok()?;
    let y = captures
        .get(2)
        .or_else(|| captures.get(3))?
        .as_str()
        .parse()
        .ok()?;
    Some(Position { x, y })
}

fn aggregate_zones(seats: &[ParsedSeat]) -> Vec<DetectedZone> {
    let mut zones: Vec<DetectedZone> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for seat in seats {
        let Some(zone_id) = seat.zone.as_deref() else {
            continue;
        };
        let slot = *index.entry(zone_id).or_insert_with(|| {
            zones.push(DetectedZone {
                zone_id: zone_id.to_string(),
                zone_name: seat
                    .zone_name
                    .clone()
                    .unwrap_or_else(|| clean_zone_name(zone_id)),
                seat_count: 0,
                seat_ids: Vec::new(),
            });
            zones.len() - 1
        });
        zones[slot].seat_count += 1;
        zones[slot].seat_ids.push(seat.seat_id.clone());
    }

    zones
}
