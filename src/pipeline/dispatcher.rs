//! Worker-pool dispatcher.
//!
//! Pulls admitted jobs off the queue, waits for a free slot, and hands each
//! job to its own worker task. The loop never waits on a worker, so the only
//! limit on concurrency is the slot pool.
//!
//! A worker holds its slot until it is done with the job:
//!
//! - failure: sleep `retry_delay`, try again (forever unless `max_attempts`)
//! - success: record the signature, sleep `cooldown`, release the slot
//!
//! The cooldown is what keeps throughput under the signer's per-minute quota.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::job::Job;
use super::slots::{Slot, SlotPool};
use super::store::StoreHandle;
use super::supervisor::Actor;
use super::tracker::TrackerHandle;
use crate::config::RetryConfig;
use crate::error::ActorError;
use crate::signer::Signer;

pub struct Dispatcher {
    jobs: Mutex<mpsc::Receiver<Job>>,
    slots: SlotPool,
    worker: Worker,
}

/// Everything a worker task needs, cloned per job.
#[derive(Clone)]
struct Worker {
    signer: Arc<dyn Signer>,
    store: StoreHandle,
    tracker: TrackerHandle,
    retry: RetryConfig,
}

impl Dispatcher {
    pub const NAME: &'static str = "dispatcher";

    pub fn new(
        jobs: mpsc::Receiver<Job>,
        slots: SlotPool,
        signer: Arc<dyn Signer>,
        store: StoreHandle,
        tracker: TrackerHandle,
        retry: RetryConfig,
    ) -> Self {
        Self {
            jobs: Mutex::new(jobs),
            slots,
            worker: Worker {
                signer,
                store,
                tracker,
                retry,
            },
        }
    }
}

#[async_trait]
impl Actor for Dispatcher {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<(), ActorError> {
        let mut jobs = self.jobs.lock().await;
        loop {
            let job = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => return Ok(()),
                },
            };

            // A job dropped here is still in the pending map and gets
            // replayed from the snapshot on the next start.
            let slot = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(job_id = %job.id, "shutdown while waiting for a slot");
                    return Ok(());
                }
                slot = self.slots.acquire() => slot.map_err(|_| ActorError::SlotsClosed {
                    actor: Self::NAME,
                })?,
            };

            debug!(
                job_id = %job.id,
                slots_in_use = self.slots.in_use(),
                "dispatching job"
            );
            tokio::spawn(self.worker.clone().process(job, slot));
        }
    }
}

impl Worker {
    async fn process(self, job: Job, slot: Slot) {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.signer.sign(&job.message).await {
                Ok(signature) => {
                    debug!(job_id = %job.id, attempts, "signature received");
                    if let Err(e) = self.store.upsert(job.id.clone(), signature) {
                        error!(job_id = %job.id, error = %e, "failed to record signature");
                    }
                    sleep(self.retry.cooldown()).await;
                    drop(slot);
                    return;
                }
                Err(e) if self.retry.exhausted(attempts) => {
                    error!(job_id = %job.id, attempts, error = %e, "giving up on job");
                    if let Err(e) = self.tracker.remove(job.id.clone()) {
                        warn!(job_id = %job.id, error = %e, "failed to untrack abandoned job");
                    }
                    drop(slot);
                    return;
                }
                Err(e) => {
                    debug!(job_id = %job.id, attempts, error = %e, "signing failed, will retry");
                    sleep(self.retry.retry_delay()).await;
                }
            }
        }
    }
}
