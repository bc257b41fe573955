//! Map document ingestion: validation, sanitization and seat analysis.
//!
//! Both stages are synchronous and free of I/O. Callers validate first and
//! only ever hand the sanitized form downstream:
//!
//! ```ignore
//! let validated = validate(&raw)?;
//! let report = analyze(&validated.document);
//! println!("{} seats in {} zones", report.total_seats, report.zones.len());
//! ```

mod parser;
mod report;
mod validator;

pub use parser::{analyze, clean_zone_name, is_auxiliary_duplicate, is_seat_id, parse, SEAT_PREFIX};
pub use report::{AnalysisReport, AnalysisWarning, DetectedZone, ParsedSeat, WarningKind};
pub use validator::{
    validate, SanitizationReport, ValidatedDocument, DENIED_ATTRIBUTES, MAX_DOCUMENT_BYTES,
    ROOT_TAG,
};

use crate::markup::Element;
use crate::types::Dimensions;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;

/// Why a document was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationIssue {
    #[error("document is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("malformed markup: {message}")]
    Malformed { message: String },

    #[error("expected <svg> root element, found <{found}>")]
    UnexpectedRoot { found: String },
}

/// Leading numeric prefix of an attribute value (`"800px"` -> 800).
pub(crate) fn leading_number(raw: &str) -> Option<f64> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^\s*[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").expect("valid number pattern")
    });
    pattern
        .find(raw)
        .and_then(|m| m.as_str().trim().parse::<f64>().ok())
        .filter(|n| n.is_finite())
}

/// Canvas dimensions from the root element. Each field is independent.
pub(crate) fn read_dimensions(root: &Element) -> Dimensions {
    Dimensions {
        width: root.attribute("width").and_then(leading_number),
        height: root.attribute("height").and_then(leading_number),
        view_box: root
            .attribute("viewBox")
            .filter(|v| !v.trim().is_empty())
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_number() {
        assert_eq!(leading_number("800"), Some(800.0));
        assert_eq!(leading_number(" 12.5px"), Some(12.5));
        assert_eq!(leading_number("-3"), Some(-3.0));
        assert_eq!(leading_number(".5"), Some(0.5));
        assert_eq!(leading_number("1e2"), Some(100.0));
        assert_eq!(leading_number("100%"), Some(100.0));
        assert_eq!(leading_number("auto"), None);
        assert_eq!(leading_number(""), None);
    }

    #[test]
    fn test_issue_messages() {
        let issue = ValidationIssue::UnexpectedRoot {
            found: "html".into(),
        };
        assert_eq!(issue.to_string(), "expected <svg> root element, found <html>");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "unexpected_root");
    }
}
