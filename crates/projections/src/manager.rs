//! Projection manager: one checkpointed polling loop per projection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use event_store::{EventQuery, EventStore};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::Result;
use crate::error::ProjectionError;
use crate::projection::Projection;

/// Configuration for the projection manager.
#[derive(Debug, Clone)]
pub struct ProjectionManagerConfig {
    /// How often each projection polls for new events.
    pub poll_interval: Duration,

    /// Maximum events fetched per poll.
    pub batch_limit: usize,
}

impl Default for ProjectionManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            batch_limit: 256,
        }
    }
}

/// Drives registered projections from the event store.
///
/// `start` spawns one polling loop per projection; each loop fetches
/// events of the projection's interested types newer than its checkpoint
/// and applies them in order. `stop` signals every loop and joins it, so
/// no poll is left mid-flight.
pub struct ProjectionManager<S: EventStore + Clone + Send + Sync + 'static> {
    store: S,
    config: ProjectionManagerConfig,
    projections: Vec<Arc<dyn Projection>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: EventStore + Clone + Send + Sync + 'static> ProjectionManager<S> {
    /// Creates a manager with the default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, ProjectionManagerConfig::default())
    }

    /// Creates a manager with the given configuration.
    pub fn with_config(store: S, config: ProjectionManagerConfig) -> Self {
        Self {
            store,
            config,
            projections: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a projection. Must be called before `start`.
    pub fn register(&mut self, projection: Arc<dyn Projection>) {
        self.projections.push(projection);
    }

    /// Returns the number of registered projections.
    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Spawns one polling loop per registered projection.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut workers = self.workers.lock().await;
        for projection in &self.projections {
            let store = self.store.clone();
            let projection = Arc::clone(projection);
            let running = Arc::clone(&self.running);
            let shutdown = Arc::clone(&self.shutdown);
            let poll_interval = self.config.poll_interval;
            let batch_limit = self.config.batch_limit;

            let handle = tokio::spawn(async move {
                tracing::info!(projection = projection.name(), "projection loop started");
                while running.load(Ordering::SeqCst) {
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {
                            if let Err(e) =
                                poll_once(&store, projection.as_ref(), batch_limit).await
                            {
                                tracing::warn!(
                                    projection = projection.name(),
                                    error = %e,
                                    "projection poll failed"
                                );
                            }
                        }
                        _ = shutdown.notified() => break,
                    }
                }
                tracing::info!(projection = projection.name(), "projection loop stopped");
            });
            workers.push(handle);
        }
    }

    /// Stops all polling loops and waits for them to finish.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
    }

    /// Applies every pending event to every projection, returning when all
    /// projections are caught up. Used at startup and in tests.
    #[tracing::instrument(skip(self))]
    pub async fn catch_up(&self) -> Result<()> {
        for projection in &self.projections {
            loop {
                let applied = poll_once(&self.store, projection.as_ref(), self.config.batch_limit)
                    .await?;
                if applied == 0 {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Clears one projection and reprocesses its entire event history.
    ///
    /// The rebuilt state must equal the incrementally-maintained state.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild(&self, name: &str) -> Result<()> {
        let projection = self
            .projections
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| ProjectionError::UnknownProjection(name.to_string()))?;

        projection.reset().await?;
        loop {
            let applied =
                poll_once(&self.store, projection.as_ref(), self.config.batch_limit).await?;
            if applied == 0 {
                break;
            }
        }
        metrics::counter!("projection_rebuilds").increment(1);
        Ok(())
    }

    /// Rebuilds every registered projection.
    pub async fn rebuild_all(&self) -> Result<()> {
        for projection in &self.projections {
            self.rebuild(projection.name()).await?;
        }
        Ok(())
    }
}

/// Fetches one batch of events past the projection's checkpoint and applies
/// them, advancing the checkpoint event by event. Returns how many events
/// were applied.
async fn poll_once<S: EventStore>(
    store: &S,
    projection: &dyn Projection,
    batch_limit: usize,
) -> Result<usize> {
    let mut query = EventQuery::for_event_types(projection.interested_in().iter().copied())
        .limit(batch_limit);
    if let Some(checkpoint) = projection.checkpoint().await {
        query = query.after_timestamp(checkpoint);
    }

    let events = store.query_events(query).await?;
    let mut applied = 0;

    for event in &events {
        projection.handle(event).await?;
        projection.set_checkpoint(event.timestamp).await;
        applied += 1;
        metrics::counter!("projection_events_applied").increment(1);
    }

    Ok(applied)
}
