//! Pending tracker: sole writer of the map of admitted, not-yet-signed jobs.
//!
//! Writes arrive as [`TrackingOutcome`] commands over an unbounded channel and
//! are applied one at a time by the actor's run loop. Reads go through the
//! same `RwLock` the actor writes under, so a status query never observes a
//! half-applied command.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::job::{PendingEntry, TrackingOutcome};
use super::supervisor::Actor;
use crate::error::ActorError;

pub type PendingMap = HashMap<String, PendingEntry>;

pub struct PendingTracker {
    pending: Arc<RwLock<PendingMap>>,
    commands: Mutex<mpsc::UnboundedReceiver<TrackingOutcome>>,
}

/// Cloneable access to the tracker: submit commands, read entries.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    pending: Arc<RwLock<PendingMap>>,
    commands: mpsc::UnboundedSender<TrackingOutcome>,
}

impl PendingTracker {
    pub const NAME: &'static str = "pending-tracker";

    /// Create the actor seeded with `initial` (e.g. state recovered from disk).
    pub fn new(initial: PendingMap) -> (Self, TrackerHandle) {
        let pending = Arc::new(RwLock::new(initial));
        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = Self {
            pending: Arc::clone(&pending),
            commands: Mutex::new(rx),
        };
        let handle = TrackerHandle {
            pending,
            commands: tx,
        };
        (tracker, handle)
    }

    async fn apply(&self, outcome: TrackingOutcome) {
        let mut pending = self.pending.write().await;
        match outcome {
            TrackingOutcome::Upsert(entry) => {
                debug!(job_id = %entry.job.id, "tracking pending request");
                pending.insert(entry.job.id.clone(), entry);
            }
            TrackingOutcome::Remove { id } => {
                if pending.remove(&id).is_some() {
                    debug!(job_id = %id, "request no longer pending");
                } else {
                    trace!(job_id = %id, "remove for untracked request ignored");
                }
            }
        }
    }
}

#[async_trait]
impl Actor for PendingTracker {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<(), ActorError> {
        let mut commands = self.commands.lock().await;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    // Jobs admitted just before shutdown must reach the checkpoint.
                    while let Ok(outcome) = commands.try_recv() {
                        self.apply(outcome).await;
                    }
                    return Ok(());
                }
                command = commands.recv() => match command {
                    Some(outcome) => self.apply(outcome).await,
                    None => return Ok(()),
                },
            }
        }
    }
}

impl TrackerHandle {
    pub fn apply(&self, outcome: TrackingOutcome) -> Result<(), ActorError> {
        trace!(job_id = outcome.id(), actor = PendingTracker::NAME, "queueing command");
        self.commands
            .send(outcome)
            .map_err(|_| ActorError::ChannelClosed {
                actor: PendingTracker::NAME,
            })
    }

    pub fn upsert(&self, entry: PendingEntry) -> Result<(), ActorError> {
        self.apply(TrackingOutcome::Upsert(entry))
    }

    pub fn remove(&self, id: impl Into<String>) -> Result<(), ActorError> {
        self.apply(TrackingOutcome::Remove { id: id.into() })
    }

    pub async fn get(&self, id: &str) -> Option<PendingEntry> {
        self.pending.read().await.get(id).cloned()
    }

    #[cfg(test)]
    pub async fn contains(&self, id: &str) -> bool {
        self.pending.read().await.contains_key(id)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn snapshot(&self) -> PendingMap {
        self.pending.read().await.clone()
    }

    /// A handle whose commands land in the returned receiver instead of an actor.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<TrackingOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            pending: Arc::new(RwLock::new(PendingMap::new())),
            commands: tx,
        };
        (handle, rx)
    }
}
