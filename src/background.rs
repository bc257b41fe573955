//! Named background threads with cooperative shutdown.

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// A running background thread. Stopped on drop.
pub struct BackgroundTask {
    name: String,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Run `body` until the returned task is stopped.
    ///
    /// `body` receives the shutdown receiver and must return once it fires
    /// or disconnects.
    pub fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(shutdown_rx))?;

        debug!(task = name, "Started background task");
        Ok(Self {
            name: name.to_string(),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Call `work` every `interval` until stopped.
    pub fn spawn_periodic<F>(name: &str, interval: Duration, mut work: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn(name, move |shutdown| {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(ticker) -> _ => work(),
                    recv(shutdown) -> _ => break,
                }
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal shutdown and wait for the thread to exit.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the receiver even if the send is missed.
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(task = %self.name, "Background task panicked");
            } else {
                debug!(task = %self.name, "Stopped background task");
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop();
    }
}
