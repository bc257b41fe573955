//! Wiring of the whole service.

use crate::background::BackgroundTask;
use crate::documents::{DocumentStore, DocumentStoreConfig, FsDocumentStore};
use crate::error::Result;
use crate::realtime::{Broadcaster, BroadcasterConfig, ChangeTailer};
use crate::registrar::MapRegistrar;
use crate::reservation::{ReservationConfig, ReservationEngine};
use crate::seats::{SeatStore, SeatStoreConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Venue configuration.
#[derive(Clone, Debug, Default)]
pub struct VenueConfig {
    pub store: SeatStoreConfig,
    pub documents: DocumentStoreConfig,
    pub reservation: ReservationConfig,
    pub broadcaster: BroadcasterConfig,
}

impl VenueConfig {
    /// Defaults with all data under `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            store: SeatStoreConfig {
                path: path.join("seats"),
                ..Default::default()
            },
            documents: DocumentStoreConfig {
                path: path.join("documents"),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// An open venue: store, engines and background tasks.
pub struct Venue {
    store: Arc<SeatStore>,
    engine: Arc<ReservationEngine>,
    registrar: MapRegistrar,
    broadcaster: Arc<Broadcaster>,
    tasks: Vec<BackgroundTask>,
}

impl Venue {
    pub fn open(config: VenueConfig) -> Result<Self> {
        let store = Arc::new(SeatStore::open(config.store)?);
        let documents: Arc<dyn DocumentStore> = Arc::new(FsDocumentStore::new(config.documents)?);

        let engine = Arc::new(ReservationEngine::new(Arc::clone(&store), config.reservation));
        let registrar = MapRegistrar::new(Arc::clone(&store), documents);
        let broadcaster = Arc::new(Broadcaster::new(config.broadcaster));

        Ok(Self {
            store,
            engine,
            registrar,
            broadcaster,
            tasks: Vec::new(),
        })
    }

    /// Start the change tailer, hold sweeper and subscriber reaper.
    ///
    /// Calling it again while running is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if !self.tasks.is_empty() {
            return Ok(());
        }

        self.tasks
            .push(ChangeTailer::spawn(self.store.as_ref(), Arc::clone(&self.broadcaster))?);
        self.tasks.push(self.engine.spawn_sweeper()?);
        self.tasks.push(self.broadcaster.spawn_reaper()?);

        info!(tasks = self.tasks.len(), "Venue started");
        Ok(())
    }

    /// Stop background tasks. Idempotent.
    pub fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in &mut self.tasks {
            task.stop();
        }
        self.tasks.clear();
        info!("Venue stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn store(&self) -> &Arc<SeatStore> {
        &self.store
    }

    pub fn reservations(&self) -> &Arc<ReservationEngine> {
        &self.engine
    }

    pub fn registrar(&self) -> &MapRegistrar {
        &self.registrar
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }
}

impl Drop for Venue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
