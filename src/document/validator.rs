//! Size, structure and safety checks for untrusted map documents.

use super::{read_dimensions, ValidationIssue};
use crate::error::{Result, VenueError};
use crate::markup::{local_part, Document};
use crate::types::Dimensions;
use tracing::debug;

/// Upper bound on document size, in UTF-8 bytes.
pub const MAX_DOCUMENT_BYTES: usize = 2 * 1024 * 1024;

/// Required local name of the root element.
pub const ROOT_TAG: &str = "svg";

/// Event-handler attributes stripped from every element.
pub const DENIED_ATTRIBUTES: &[&str] = &[
    "onload",
    "onclick",
    "onmouseover",
    "onmouseout",
    "onmousedown",
    "onmouseup",
    "onfocus",
    "onblur",
    "onerror",
    "onabort",
    "oninput",
    "onchange",
    "onsubmit",
    "onkeydown",
    "onkeyup",
    "onkeypress",
];

const SCRIPT_TAG: &str = "script";

/// What the sanitization pass removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SanitizationReport {
    pub attributes_removed: usize,
    pub scripts_removed: usize,
}

impl SanitizationReport {
    pub fn is_clean(&self) -> bool {
        self.attributes_removed == 0 && self.scripts_removed == 0
    }
}

/// A document that passed validation.
///
/// `sanitized` is the only form that may be stored or analysed further;
/// `document` is the tree it was serialized from.
#[derive(Clone, Debug)]
pub struct ValidatedDocument {
    pub document: Document,
    pub sanitized: String,
    pub dimensions: Dimensions,
    pub sanitization: SanitizationReport,
}

/// Validate and sanitize raw map markup.
pub fn validate(raw: &str) -> Result<ValidatedDocument> {
    if raw.len() > MAX_DOCUMENT_BYTES {
        return Err(ValidationIssue::TooLarge {
            size: raw.len(),
            limit: MAX_DOCUMENT_BYTES,
        }
        .into());
    }

    let mut document = Document::parse(raw).map_err(|e| ValidationIssue::Malformed {
        message: e.to_string(),
    })?;

    let root_name = document.root_element().local_name();
    if root_name != ROOT_TAG {
        return Err(ValidationIssue::UnexpectedRoot {
            found: document.root_element().name().to_string(),
        }
        .into());
    }

    let sanitization = sanitize(&mut document);
    if !sanitization.is_clean() {
        debug!(
            attributes = sanitization.attributes_removed,
            scripts = sanitization.scripts_removed,
            "Sanitized map document"
        );
    }

    let dimensions = read_dimensions(document.root_element());
    let sanitized = document
        .serialize()
        .map_err(|e| VenueError::Serialization(e.to_string()))?;

    Ok(ValidatedDocument {
        document,
        sanitized,
        dimensions,
        sanitization,
    })
}

/// Strip handler attributes and detach script elements across the whole tree.
fn sanitize(document: &mut Document) -> SanitizationReport {
    let mut report = SanitizationReport::default();
    let mut stack = vec![document.root()];

    while let Some(id) = stack.pop() {
        let Some(element) = document.element_mut(id) else {
            continue;
        };

        if element.local_name().eq_ignore_ascii_case(SCRIPT_TAG) {
            if document.detach(id) {
                report.scripts_removed += 1;
            }
            continue;
        }

        report.attributes_removed += element.retain_attributes(|name| !is_denied(name));
        stack.extend(document.children(id).iter().rev().copied());
    }

    report
}

fn is_denied(attribute: &str) -> bool {
    let local = local_part(attribute);
    DENIED_ATTRIBUTES
        .iter()
        .any(|denied| denied.eq_ignore_ascii_case(local))
}
