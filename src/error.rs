//! Error types for the seat map service.

use crate::document::ValidationIssue;
use crate::types::{SeatKey, SeatStatus};
use thiserror::Error;

/// Main error type for venue operations.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document rejected: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),

    #[error("Seat no longer available: {0}")]
    Conflict(SeatKey),

    #[error("Seat not found in the required state: {0}")]
    NotFound(SeatKey),

    #[error("Operation not allowed for seat {key} in status {status}")]
    InvalidState { key: SeatKey, status: SeatStatus },

    #[error("Map not found: {0}")]
    MapNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Invalid document name: {0}")]
    InvalidName(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Coarse error classes surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed, oversized or unsafe input. Never partially applied.
    Validation,
    /// Lost a race for a hold.
    Conflict,
    /// Target does not exist in the required state.
    NotFound,
    /// Operation is not legal for the current status.
    InvalidState,
    /// Persistence is unavailable or damaged.
    StorageFailure,
}

impl VenueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VenueError::Validation(_) | VenueError::InvalidName(_) => ErrorKind::Validation,
            VenueError::Conflict(_) => ErrorKind::Conflict,
            VenueError::NotFound(_) | VenueError::MapNotFound(_) | VenueError::DocumentNotFound(_) => {
                ErrorKind::NotFound
            }
            VenueError::InvalidState { .. } => ErrorKind::InvalidState,
            VenueError::Io(_)
            | VenueError::Serialization(_)
            | VenueError::Deserialization(_)
            | VenueError::Corruption(_)
            | VenueError::ChecksumMismatch { .. }
            | VenueError::InvalidFormat(_)
            | VenueError::Locked
            | VenueError::NotInitialized => ErrorKind::StorageFailure,
        }
    }

    /// Status code a transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::InvalidState => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::StorageFailure => 500,
        }
    }

    /// Expected contention outcomes are not system faults.
    pub fn is_expected(&self) -> bool {
        !matches!(self.kind(), ErrorKind::StorageFailure)
    }
}

impl From<serde_json::Error> for VenueError {
    fn from(e: serde_json::Error) -> Self {
        VenueError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for VenueError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        VenueError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for VenueError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        VenueError::Deserialization(e.to_string())
    }
}

impl From<ValidationIssue> for VenueError {
    fn from(issue: ValidationIssue) -> Self {
        VenueError::Validation(vec![issue])
    }
}

/// Result type for venue operations.
pub type Result<T> = std::result::Result<T, VenueError>;
