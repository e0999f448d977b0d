//! The signing pipeline.
//!
//! ```text
//! caller ─► AdmissionGate ─► Dispatcher ─► Signer
//!               │                 │
//!               ▼                 ▼
//!         PendingTracker ◄── SignatureStore ◄── retriever / status
//! ```
//!
//! The tracker, store and dispatcher are [`Actor`]s run under a
//! [`Supervisor`]. [`Pipeline`] wires them together from config and
//! recovered state.

pub mod admission;
pub mod dispatcher;
pub mod job;
pub mod persistence;
pub mod retriever;
pub mod slots;
pub mod store;
pub mod supervisor;
pub mod tracker;

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

pub use admission::AdmissionGate;
pub use dispatcher::Dispatcher;
pub use job::Job;
pub use persistence::{Checkpoint, RecoveredState, StateFiles};
pub use slots::SlotPool;
pub use store::{SignatureStore, StoreHandle};
pub use supervisor::{Actor, ExitReason, Supervisor};
pub use tracker::{PendingTracker, TrackerHandle};

use crate::config::ServiceConfig;
use crate::signer::Signer;

pub struct Pipeline {
    gate: AdmissionGate,
    store: StoreHandle,
    tracker: TrackerHandle,
    slots: SlotPool,
    actors: Vec<Arc<dyn Actor>>,
    recovered: Vec<Job>,
}

impl Pipeline {
    pub fn new(config: &ServiceConfig, signer: Arc<dyn Signer>, state: RecoveredState) -> Self {
        let recovered = state.jobs();
        let (tracker, tracker_handle) = PendingTracker::new(state.pending);
        let (store, store_handle) = SignatureStore::new(state.signatures, tracker_handle.clone());
        let (gate, queue) = AdmissionGate::new(config.max_queue_size, tracker_handle.clone());
        let slots = SlotPool::new(config.max_concurrent_signings);
        let dispatcher = Dispatcher::new(
            queue,
            slots.clone(),
            signer,
            store_handle.clone(),
            tracker_handle.clone(),
            config.retry.clone(),
        );

        Self {
            gate,
            store: store_handle,
            tracker: tracker_handle,
            slots,
            actors: vec![Arc::new(tracker), Arc::new(store), Arc::new(dispatcher)],
            recovered,
        }
    }

    /// Hand every actor to `supervisor`. Only the first call has any effect.
    pub fn start(&mut self, supervisor: &mut Supervisor) {
        for actor in self.actors.drain(..) {
            supervisor.spawn(actor);
        }
    }

    /// Re-queue jobs recovered from the last run. Resolves to the number
    /// re-queued. Spawn it: it waits for queue room if recovery overfills it.
    pub fn replay(&mut self) -> impl Future<Output = usize> + Send + 'static {
        let jobs = std::mem::take(&mut self.recovered);
        let gate = self.gate.clone();
        async move {
            let total = jobs.len();
            let mut replayed = 0;
            for job in jobs {
                let id = job.id.clone();
                match gate.readmit(job).await {
                    Ok(()) => replayed += 1,
                    Err(e) => {
                        warn!(job_id = %id, error = %e, "failed to replay pending job");
                        break;
                    }
                }
            }
            if total > 0 {
                info!(replayed, total, "replayed pending jobs");
            }
            replayed
        }
    }

    pub fn checkpoint(&self, files: StateFiles) -> Checkpoint {
        Checkpoint::new(files, self.store.clone(), self.tracker.clone())
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn tracker(&self) -> &TrackerHandle {
        &self.tracker
    }

    pub fn slots(&self) -> &SlotPool {
        &self.slots
    }
}
