use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minutes reported for a pending request whose estimate has already elapsed.
pub const DEFAULT_REMAINING_MINUTES: f64 = 5.0;

/// Jobs assumed to drain per minute per unit of queue depth.
const JOBS_PER_MINUTE: f64 = 5.0;

/// Estimated minutes until a job admitted behind `queue_depth` others is signed.
///
/// Never below one minute: an empty queue can still be waiting on retries.
pub fn estimate_minutes(queue_depth: usize) -> f64 {
    (queue_depth as f64 / JOBS_PER_MINUTE).ceil().max(1.0)
}

/// A single admitted signing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub message: String,
}

impl Job {
    pub fn new(message: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message,
        }
    }
}

/// When a job was admitted and how long it was expected to take.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub submitted_at: DateTime<Utc>,
    pub eta_minutes: f64,
}

impl Timing {
    /// Compute the timing for a job admitted at `now` with `queue_depth` jobs queued.
    pub fn estimate(now: DateTime<Utc>, queue_depth: usize) -> Self {
        Self {
            submitted_at: now,
            eta_minutes: estimate_minutes(queue_depth),
        }
    }

    /// Minutes left on the estimate as of `now`.
    ///
    /// An estimate that has run out reports [`DEFAULT_REMAINING_MINUTES`]
    /// instead of zero or a negative number.
    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - self.submitted_at).num_milliseconds() as f64 / 60_000.0;
        let remaining = self.eta_minutes - elapsed;
        if remaining < 0.0 {
            DEFAULT_REMAINING_MINUTES
        } else {
            remaining
        }
    }
}

/// A job that has been admitted and not yet signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub job: Job,
    pub timing: Timing,
}

/// Command applied by the signature store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningOutcome {
    /// A signature was produced for `id`.
    Upsert { id: String, signature: String },
    /// The signature for `id` was handed to a caller and can be dropped.
    Remove { id: String },
}

impl SigningOutcome {
    pub fn id(&self) -> &str {
        match self {
            SigningOutcome::Upsert { id, .. } | SigningOutcome::Remove { id } => id,
        }
    }
}

/// Command applied by the pending tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingOutcome {
    /// A job was admitted.
    Upsert(PendingEntry),
    /// A job is no longer pending.
    Remove { id: String },
}

impl TrackingOutcome {
    pub fn id(&self) -> &str {
        match self {
            TrackingOutcome::Upsert(entry) => &entry.job.id,
            TrackingOutcome::Remove { id } => id,
        }
    }
}
