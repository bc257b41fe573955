//! # Seat Map
//!
//! Venue seat inventory and reservations, derived from vector map documents.
//!
//! ## Core Concepts
//!
//! - **Documents**: Untrusted map markup is validated, sanitized and
//!   analysed into seats and zones
//! - **Registration**: A map's inventory is replaced atomically from its document
//! - **Reservations**: `available -> held -> confirmed` transitions, each a
//!   single conditional write; lapsed holds are swept back
//! - **Realtime**: Committed seat changes are fanned out to subscribers
//!
//! ## Example
//!
//! ```ignore
//! use seatmap::{Venue, VenueConfig};
//!
//! let mut venue = Venue::open(VenueConfig::at("./venue-data"))?;
//! venue.start()?;
//!
//! venue.registrar().register("arena.svg", &document)?;
//! let seat = venue.reservations().hold("arena.svg", "seat-A1")?;
//!
//! let updates = venue.broadcaster().connect()?;
//! ```

pub mod background;
pub mod document;
pub mod documents;
pub mod error;
pub mod markup;
pub mod realtime;
pub mod registrar;
pub mod reservation;
pub mod seats;
pub mod types;
pub mod venue;

// Re-exports
pub use background::BackgroundTask;
pub use document::{
    analyze, parse, validate, AnalysisReport, AnalysisWarning, DetectedZone, ParsedSeat,
    ValidatedDocument, ValidationIssue, WarningKind,
};
pub use documents::{DocumentStore, DocumentStoreConfig, FsDocumentStore, StoredDocument};
pub use error::{ErrorKind, Result, VenueError};
pub use realtime::{
    Broadcaster, BroadcasterConfig, ChangeEvent, ChangeTailer, DeliveryReport, OutboundMessage,
    SubscriberHandle, SubscriberId,
};
pub use registrar::{MapRegistrar, RegistrationResult, UploadRequest, UploadResult};
pub use reservation::{ReservationConfig, ReservationEngine, SweepSummary};
pub use seats::{
    ChangeFeed, Commit, HoldCondition, MapReplacement, Mutation, MutationKind, SeatStore,
    SeatStoreConfig, Transition, TransitionOutcome,
};
pub use types::*;
pub use venue::{Venue, VenueConfig};
