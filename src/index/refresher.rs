//! Background snapshot refresher
//!
//! A single task owns the publishing side of the snapshot channel. It
//! reloads the store on a timer or on request, builds the new snapshot on
//! the blocking pool and swaps it in only once complete.

use super::IndexSnapshot;
use crate::error::{QuarryError, Result};
use crate::storage::CorpusStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Pending refresh requests beyond this are dropped; one is already queued
const REQUEST_QUEUE_SIZE: usize = 64;

type RefreshReply = oneshot::Sender<std::result::Result<u64, String>>;

/// Refresher lifecycle state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum RefreshState {
    Idle,
    Refreshing,
    Failed(String),
}

/// Observable refresher state
#[derive(Debug, Clone, Serialize)]
pub struct RefresherStatus {
    pub state: RefreshState,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub last_refresh_error: Option<String>,
    pub refreshes: u64,
}

enum Command {
    Refresh(Option<RefreshReply>),
    Shutdown,
}

/// Cloneable handle to the refresher task
#[derive(Clone)]
pub struct RefresherHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Arc<IndexSnapshot>>,
    status: watch::Receiver<RefresherStatus>,
}

impl RefresherHandle {
    /// The snapshot current at the time of the call
    pub fn current(&self) -> Arc<IndexSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn status(&self) -> RefresherStatus {
        self.status.borrow().clone()
    }

    /// Ask for a refresh without waiting for it
    pub fn request_refresh(&self) {
        match self.commands.try_send(Command::Refresh(None)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Refresh queue full, request coalesced");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Refresh requested after refresher shut down");
            }
        }
    }

    /// Refresh and wait for the outcome, returning the published generation
    pub async fn refresh_now(&self) -> Result<u64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Refresh(Some(reply_tx)))
            .await
            .map_err(|_| QuarryError::RefresherClosed("refresher has shut down".to_string()))?;

        reply_rx
            .await
            .map_err(|_| QuarryError::RefresherClosed("refresh dropped".to_string()))?
            .map_err(QuarryError::Refresh)
    }

    /// Stop the task; the last snapshot stays readable through this handle
    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_err() {
            tracing::debug!("Refresher already stopped");
        }
    }
}

/// Spawn the refresher task serving `initial` until the first refresh
pub fn spawn_refresher(
    store: CorpusStore,
    initial: Arc<IndexSnapshot>,
    interval: Duration,
) -> (RefresherHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(REQUEST_QUEUE_SIZE);
    let loaded_at = initial.loaded_at();
    let (snapshot_tx, snapshot_rx) = watch::channel(initial);
    let (status_tx, status_rx) = watch::channel(RefresherStatus {
        state: RefreshState::Idle,
        last_refresh_at: Some(loaded_at),
        last_refresh_error: None,
        refreshes: 0,
    });

    let worker = RefreshWorker {
        store,
        snapshot: snapshot_tx,
        status: status_tx,
    };
    let task = tokio::spawn(worker.run(command_rx, interval));

    let handle = RefresherHandle {
        commands: command_tx,
        snapshot: snapshot_rx,
        status: status_rx,
    };
    (handle, task)
}

struct RefreshWorker {
    store: CorpusStore,
    snapshot: watch::Sender<Arc<IndexSnapshot>>,
    status: watch::Sender<RefresherStatus>,
}

impl RefreshWorker {
    async fn run(self, mut commands: mpsc::Receiver<Command>, interval: Duration) {
        // tokio intervals panic on a zero period
        let interval = interval.max(Duration::from_millis(1));
        let mut timer = time::interval_at(time::Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Snapshot refresher started (interval {:?})", interval);

        loop {
            let mut waiters = Vec::new();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Refresh(reply)) => waiters.extend(reply),
                    Some(Command::Shutdown) | None => break,
                },

                _ = timer.tick() => {
                    tracing::debug!("Scheduled refresh");
                }
            }

            // Everything queued now is served by this one refresh
            let mut shutdown = false;
            while let Ok(command) = commands.try_recv() {
                match command {
                    Command::Refresh(reply) => waiters.extend(reply),
                    Command::Shutdown => shutdown = true,
                }
            }

            let outcome = self.refresh().await;
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }

            if shutdown {
                break;
            }
        }

        tracing::info!("Snapshot refresher stopped");
    }

    async fn refresh(&self) -> std::result::Result<u64, String> {
        self.status
            .send_modify(|status| status.state = RefreshState::Refreshing);

        let store = self.store.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load().map(IndexSnapshot::build))
            .await
            .map_err(|e| format!("Refresh task failed: {}", e))
            .and_then(|result| result.map_err(|e| e.to_string()));

        let current_generation = self.snapshot.borrow().generation();
        let outcome = match loaded {
            Ok(snapshot) if snapshot.generation() < current_generation => Err(format!(
                "Store generation {} is behind current snapshot generation {}",
                snapshot.generation(),
                current_generation
            )),
            Ok(snapshot) => {
                let generation = snapshot.generation();
                let loaded_at = snapshot.loaded_at();
                tracing::info!(
                    "Published snapshot generation {} ({} documents, {} embeddings)",
                    generation,
                    snapshot.document_count(),
                    snapshot.embedding_count()
                );
                self.snapshot.send_replace(Arc::new(snapshot));
                Ok((generation, loaded_at))
            }
            Err(e) => Err(e),
        };

        match &outcome {
            Ok((_, loaded_at)) => self.status.send_modify(|status| {
                status.state = RefreshState::Idle;
                status.last_refresh_at = Some(*loaded_at);
                status.last_refresh_error = None;
                status.refreshes += 1;
            }),
            Err(e) => {
                tracing::error!("Snapshot refresh failed, keeping previous snapshot: {}", e);
                self.status.send_modify(|status| {
                    status.state = RefreshState::Failed(e.clone());
                    status.last_refresh_error = Some(e.clone());
                });
            }
        }

        outcome.map(|(generation, _)| generation)
    }
}
