//! Caller-facing operations: submit a message, query a request.
//!
//! A signature is handed out at most once. Both submit and query obtain it
//! through [`StoreHandle::take`], which removes it in the same step.

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::PollConfig;
use crate::error::AtCapacity;
use crate::pipeline::retriever::await_signature;
use crate::pipeline::{AdmissionGate, Pipeline, StoreHandle, TrackerHandle};

/// Result of submitting a message for signing.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Signed within the synchronous wait.
    Signed { id: String, signature: String },
    /// Queued; check back after roughly `eta_minutes`.
    Accepted { id: String, eta_minutes: f64 },
    /// The admission queue is full.
    Rejected { capacity: usize },
}

/// What is known about a request id.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestStatus {
    Completed { signature: String },
    Pending { remaining_minutes: f64 },
    NotFound,
}

#[derive(Debug, Clone)]
pub struct SigningService {
    gate: AdmissionGate,
    store: StoreHandle,
    tracker: TrackerHandle,
    poll: PollConfig,
}

impl SigningService {
    pub fn new(pipeline: &Pipeline, poll: PollConfig) -> Self {
        Self {
            gate: pipeline.gate().clone(),
            store: pipeline.store().clone(),
            tracker: pipeline.tracker().clone(),
            poll,
        }
    }

    pub async fn submit(&self, message: String) -> Submission {
        let admitted = match self.gate.try_admit(message) {
            Ok(admitted) => admitted,
            Err(AtCapacity { capacity }) => return Submission::Rejected { capacity },
        };
        let id = admitted.job.id;

        if await_signature(&self.store, &id, &self.poll).await.is_ok()
            && let Some(signature) = self.claim(&id).await
        {
            return Submission::Signed { id, signature };
        }
        Submission::Accepted {
            id,
            eta_minutes: admitted.timing.eta_minutes,
        }
    }

    pub async fn query(&self, id: &str) -> RequestStatus {
        if let Some(signature) = self.claim(id).await {
            return RequestStatus::Completed { signature };
        }
        if let Some(entry) = self.tracker.get(id).await {
            debug!(job_id = %id, "request still pending");
            return RequestStatus::Pending {
                remaining_minutes: entry.timing.remaining_minutes(Utc::now()),
            };
        }
        // The job may have been signed between the two reads above.
        if let Some(signature) = self.claim(id).await {
            return RequestStatus::Completed { signature };
        }
        debug!(job_id = %id, "unknown request id");
        RequestStatus::NotFound
    }

    async fn claim(&self, id: &str) -> Option<String> {
        self.store.take(id).await.unwrap_or_else(|e| {
            warn!(job_id = %id, error = %e, "failed to claim signature");
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::pipeline::job::{Job, PendingEntry, Timing};
    use crate::pipeline::{RecoveredState, StateFiles, Supervisor};
    use crate::signer::{Signer, SignerError};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::future::Future;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct Instant;

    #[async_trait]
    impl Signer for Instant {
        async fn sign(&self, message: &str) -> Result<String, SignerError> {
            Ok(format!("sig({message})"))
        }
    }

    struct Down;

    #[async_trait]
    impl Signer for Down {
        async fn sign(&self, _message: &str) -> Result<String, SignerError> {
            Err(SignerError::Status { status: 503 })
        }
    }

    struct Running {
        service: SigningService,
        pipeline: Pipeline,
        shutdown: CancellationToken,
        _dir: TempDir,
    }

    fn config(max_queue_size: usize) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.max_queue_size = max_queue_size;
        config.max_concurrent_signings = 1;
        config.retry.retry_delay_ms = 10;
        config.retry.cooldown_ms = 10;
        config.poll.max_elapsed_ms = 300;
        config
    }

    fn run(config: ServiceConfig, signer: Arc<dyn Signer>, state: RecoveredState) -> Running {
        let dir = TempDir::new().unwrap();
        let files = StateFiles::new(dir.path().join("s.json"), dir.path().join("p.json"));
        let mut pipeline = Pipeline::new(&config, signer, state);
        let shutdown = CancellationToken::new();
        let mut supervisor = Supervisor::new(shutdown.clone(), pipeline.checkpoint(files));
        pipeline.start(&mut supervisor);
        let service = SigningService::new(&pipeline, config.poll.clone());
        tokio::spawn({
            let shutdown = shutdown.clone();
            supervisor.run(std::future::pending(), async move { shutdown.cancelled().await })
        });
        Running {
            service,
            pipeline,
            shutdown,
            _dir: dir,
        }
    }

    async fn eventually<F, Fut>(what: &str, mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..400 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn fast_signer_answers_synchronously_once() {
        let r = run(config(10), Arc::new(Instant), RecoveredState::default());

        let submission = r.service.submit("hello".into()).await;
        let Submission::Signed { id, signature } = submission else {
            panic!("expected signed, got {submission:?}");
        };
        assert_eq!(signature, "sig(hello)");

        assert!(r.pipeline.store().get(&id).await.is_none());
        eventually("untracked", || async { !r.pipeline.tracker().contains(&id).await }).await;
        assert_eq!(r.service.query(&id).await, RequestStatus::NotFound);
        r.shutdown.cancel();
    }

    #[tokio::test]
    async fn failing_signer_defers_and_stays_pending() {
        let r = run(config(10), Arc::new(Down), RecoveredState::default());

        let submission = r.service.submit("hello".into()).await;
        let Submission::Accepted { id, eta_minutes } = submission else {
            panic!("expected accepted, got {submission:?}");
        };
        assert_eq!(eta_minutes, 1.0);

        for _ in 0..3 {
            match r.service.query(&id).await {
                RequestStatus::Pending { remaining_minutes } => {
                    assert!(remaining_minutes > 0.0 && remaining_minutes <= 1.0)
                }
                other => panic!("expected pending, got {other:?}"),
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(r.pipeline.slots().in_use(), 1);
        r.shutdown.cancel();
    }

    #[tokio::test]
    async fn full_queue_rejects() {
        // One job pins the only slot, one is held by the dispatcher waiting
        // for it, one fills the queue.
        let r = run(config(1), Arc::new(Down), RecoveredState::default());
        for message in ["first", "second", "third"] {
            assert!(matches!(
                r.service.submit(message.into()).await,
                Submission::Accepted { .. }
            ));
        }
        assert_eq!(
            r.service.submit("fourth".into()).await,
            Submission::Rejected { capacity: 1 }
        );
        r.shutdown.cancel();
    }

    #[tokio::test]
    async fn completed_signature_is_returned_once() {
        let mut state = RecoveredState::default();
        state
            .signatures
            .insert("done".to_string(), "sig-done".to_string());
        let r = run(config(10), Arc::new(Instant), state);

        assert_eq!(
            r.service.query("done").await,
            RequestStatus::Completed {
                signature: "sig-done".into()
            }
        );
        assert_eq!(r.service.query("done").await, RequestStatus::NotFound);
        r.shutdown.cancel();
    }

    #[tokio::test]
    async fn concurrent_lookups_claim_a_signature_once() {
        let mut state = RecoveredState::default();
        state
            .signatures
            .insert("race".to_string(), "sig-race".to_string());
        let r = run(config(10), Arc::new(Instant), state);

        let (a, b) = tokio::join!(r.service.query("race"), r.service.query("race"));
        let completed = [&a, &b]
            .iter()
            .filter(|status| matches!(status, RequestStatus::Completed { .. }))
            .count();
        assert_eq!(completed, 1, "got {a:?} and {b:?}");
        assert!([&a, &b].contains(&&RequestStatus::NotFound));
        r.shutdown.cancel();
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let r = run(config(10), Arc::new(Instant), RecoveredState::default());
        assert_eq!(r.service.query("nope").await, RequestStatus::NotFound);
        r.shutdown.cancel();
    }

    #[tokio::test]
    async fn overdue_pending_request_reports_default_remaining() {
        // Recovered but not replayed, so it stays pending.
        let job = Job::new("overdue".into());
        let mut state = RecoveredState::default();
        state.pending.insert(
            job.id.clone(),
            PendingEntry {
                job: job.clone(),
                timing: Timing::estimate(Utc::now() - ChronoDuration::minutes(30), 35),
            },
        );
        let r = run(config(10), Arc::new(Down), state);

        assert_eq!(
            r.service.query(&job.id).await,
            RequestStatus::Pending {
                remaining_minutes: 5.0
            }
        );
        r.shutdown.cancel();
    }
}
