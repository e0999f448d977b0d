//! Admission gate: the bounded, never-blocking entry to the pipeline.
//!
//! A full queue rejects immediately. That rejection is the only backpressure
//! callers ever see.

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::job::{Job, PendingEntry, Timing};
use super::tracker::TrackerHandle;
use crate::error::{ActorError, AtCapacity};

/// A job accepted into the queue along with its completion estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct Admitted {
    pub job: Job,
    pub timing: Timing,
}

#[derive(Debug, Clone)]
pub struct AdmissionGate {
    jobs: mpsc::Sender<Job>,
    tracker: TrackerHandle,
}

impl AdmissionGate {
    /// Create a gate holding at most `capacity` queued jobs. The receiver is
    /// the dispatcher's end of the queue.
    pub fn new(capacity: usize, tracker: TrackerHandle) -> (Self, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { jobs: tx, tracker }, rx)
    }

    /// Admit `message` if the queue has room, otherwise reject without waiting.
    ///
    /// The job is tracked as pending before it becomes visible to the
    /// dispatcher, so its tracker upsert always precedes its removal.
    pub fn try_admit(&self, message: String) -> Result<Admitted, AtCapacity> {
        let permit = match self.jobs.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Full(())) => {
                debug!(capacity = self.capacity(), "admission queue full, rejecting");
                return Err(AtCapacity {
                    capacity: self.capacity(),
                });
            }
            Err(TrySendError::Closed(())) => {
                warn!("admission queue closed, rejecting");
                return Err(AtCapacity {
                    capacity: self.capacity(),
                });
            }
        };

        let job = Job::new(message);
        let timing = Timing::estimate(Utc::now(), self.depth());
        let entry = PendingEntry {
            job: job.clone(),
            timing,
        };
        if let Err(e) = self.tracker.upsert(entry) {
            warn!(job_id = %job.id, error = %e, "failed to track admitted job");
        }
        permit.send(job.clone());
        debug!(job_id = %job.id, eta_minutes = timing.eta_minutes, "job admitted");

        Ok(Admitted { job, timing })
    }

    /// Put a recovered job back on the queue, waiting for room if needed.
    pub async fn readmit(&self, job: Job) -> Result<(), ActorError> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| ActorError::ChannelClosed {
                actor: "admission-gate",
            })
    }

    /// Jobs currently queued (including reserved slots).
    pub fn depth(&self) -> usize {
        self.jobs.max_capacity() - self.jobs.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.jobs.max_capacity()
    }
}
