//! Supervision of the pipeline's actors.
//!
//! Every actor exposes the same `run(shutdown)` contract. The [`Supervisor`]
//! spawns each one, restarts any whose run loop returns an error or panics,
//! and on a fatal error or shutdown signal cancels them all and writes a
//! checkpoint before returning.
//!
//! Restarts reuse the same actor value, so commands already queued on its
//! channel are picked up by the next run.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::persistence::Checkpoint;
use crate::error::{ActorError, ServiceError};

/// How long stopped actors get to observe cancellation before state is saved.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// A long-running pipeline stage.
///
/// `run` must return `Ok(())` once `shutdown` is cancelled. Returning an
/// error asks the supervisor for a restart.
#[async_trait]
pub trait Actor: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self, shutdown: CancellationToken) -> Result<(), ActorError>;
}

/// Why the supervision loop ended.
#[derive(Debug)]
pub enum ExitReason {
    /// An interrupt or terminate signal arrived.
    Signal,
    /// The watched top-level task (the listener) failed.
    Fatal(ServiceError),
    /// The watched top-level task returned without error.
    Finished,
}

type Exit = (&'static str, Result<(), ActorError>);

pub struct Supervisor {
    actors: HashMap<&'static str, Arc<dyn Actor>>,
    running: JoinSet<Exit>,
    restarts: HashMap<&'static str, u64>,
    shutdown: CancellationToken,
    checkpoint: Checkpoint,
    grace: Duration,
}

/// Aborts the actor task when the supervising task is dropped or aborted.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Supervisor {
    pub fn new(shutdown: CancellationToken, checkpoint: Checkpoint) -> Self {
        Self {
            actors: HashMap::new(),
            running: JoinSet::new(),
            restarts: HashMap::new(),
            shutdown,
            checkpoint,
            grace: STOP_GRACE,
        }
    }

    /// Start supervising `actor`. Names must be unique.
    pub fn spawn(&mut self, actor: Arc<dyn Actor>) {
        let name = actor.name();
        if self.actors.insert(name, actor).is_some() {
            warn!(actor = name, "replacing actor with duplicate name");
        }
        self.start(name);
    }

    fn start(&mut self, name: &'static str) {
        let Some(actor) = self.actors.get(name).map(Arc::clone) else {
            return;
        };
        let shutdown = self.shutdown.clone();
        self.running.spawn(async move {
            // The inner task isolates panics so the exit is still attributed.
            let inner = tokio::spawn(async move { actor.run(shutdown).await });
            let _abort = AbortOnDrop(inner.abort_handle());
            let result = inner.await.unwrap_or_else(|e| Err(panicked(name, e)));
            (name, result)
        });
    }

    /// Number of times `name` has been restarted.
    pub fn restarts(&self, name: &str) -> u64 {
        self.restarts.get(name).copied().unwrap_or(0)
    }

    /// Supervise until `signal` fires or `fatal` completes, then cancel every
    /// actor and persist state.
    pub async fn run<F, S>(mut self, fatal: F, signal: S) -> ExitReason
    where
        F: Future<Output = Result<(), ServiceError>>,
        S: Future<Output = ()>,
    {
        tokio::pin!(fatal);
        tokio::pin!(signal);

        let reason = loop {
            tokio::select! {
                biased;
                _ = &mut signal => {
                    info!("received shutdown signal, shutting down");
                    break ExitReason::Signal;
                }
                result = &mut fatal => match result {
                    Ok(()) => {
                        info!("server stopped, shutting down");
                        break ExitReason::Finished;
                    }
                    Err(e) => {
                        error!(error = %e, "server failed unexpectedly, shutting down");
                        break ExitReason::Fatal(e);
                    }
                },
                Some(joined) = self.running.join_next() => match joined {
                    Ok((name, result)) => self.on_exit(name, result),
                    Err(e) => error!(error = %e, "supervision task failed"),
                },
            }
        };

        self.stop().await;
        reason
    }

    fn on_exit(&mut self, name: &'static str, result: Result<(), ActorError>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        match result {
            Ok(()) => info!(actor = name, "actor stopped"),
            Err(e) => {
                let restarts = self.restarts(name) + 1;
                self.restarts.insert(name, restarts);
                error!(
                    actor = name,
                    error = %e,
                    restart = restarts,
                    "actor failed unexpectedly, restarting"
                );
                self.start(name);
            }
        }
    }

    async fn stop(&mut self) {
        self.shutdown.cancel();
        let drained = tokio::time::timeout(self.grace, async {
            while self.running.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("actors still running after grace period, aborting");
            self.running.abort_all();
            while self.running.join_next().await.is_some() {}
        }
        self.checkpoint.persist().await;
    }
}

fn panicked(actor: &'static str, err: JoinError) -> ActorError {
    let message = match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(err) => err.to_string(),
    };
    ActorError::Panicked { actor, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::persistence::StateFiles;
    use crate::pipeline::store::{SignatureMap, SignatureStore};
    use crate::pipeline::tracker::{PendingMap, PendingTracker};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    /// Fails (or panics) for its first `failures` runs, then idles until cancelled.
    struct Flaky {
        name: &'static str,
        failures: u32,
        panic: bool,
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Actor for Flaky {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, shutdown: CancellationToken) -> Result<(), ActorError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if run <= self.failures {
                if self.panic {
                    panic!("flaky actor blew up");
                }
                return Err(ActorError::Failed {
                    actor: self.name,
                    message: format!("run {run} failed"),
                });
            }
            shutdown.cancelled().await;
            Ok(())
        }
    }

    fn checkpoint(dir: &TempDir) -> Checkpoint {
        let (_tracker, tracker_handle) = PendingTracker::new(PendingMap::new());
        let initial = SignatureMap::from([("kept".to_string(), "sig".to_string())]);
        let (_store, store_handle) = SignatureStore::new(initial, tracker_handle.clone());
        let files = StateFiles::new(
            dir.path().join("signatures.json"),
            dir.path().join("pending.json"),
        );
        Checkpoint::new(files, store_handle, tracker_handle)
    }

    async fn wait_for_runs(runs: &AtomicU32, expected: u32) {
        for _ in 0..200 {
            if runs.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("actor never reached {expected} runs");
    }

    #[tokio::test]
    async fn failed_actor_is_restarted() {
        let dir = TempDir::new().unwrap();
        let shutdown = CancellationToken::new();
        let mut supervisor = Supervisor::new(shutdown.clone(), checkpoint(&dir));
        let runs = Arc::new(AtomicU32::new(0));
        supervisor.spawn(Arc::new(Flaky {
            name: "flaky",
            failures: 3,
            panic: false,
            runs: Arc::clone(&runs),
        }));

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(supervisor.run(std::future::pending(), async {
            let _ = stop_rx.await;
        }));

        wait_for_runs(&runs, 4).await;
        stop_tx.send(()).unwrap();
        let reason = task.await.unwrap();

        assert!(matches!(reason, ExitReason::Signal));
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn panicking_actor_is_restarted() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = Supervisor::new(CancellationToken::new(), checkpoint(&dir));
        let runs = Arc::new(AtomicU32::new(0));
        supervisor.spawn(Arc::new(Flaky {
            name: "panicky",
            failures: 2,
            panic: true,
            runs: Arc::clone(&runs),
        }));

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(supervisor.run(std::future::pending(), async {
            let _ = stop_rx.await;
        }));

        wait_for_runs(&runs, 3).await;
        stop_tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn restart_count_is_tracked() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = Supervisor::new(CancellationToken::new(), checkpoint(&dir));
        supervisor.on_exit(
            "stage",
            Err(ActorError::Failed {
                actor: "stage",
                message: "boom".into(),
            }),
        );
        // Unknown actors are counted but not started.
        assert_eq!(supervisor.restarts("stage"), 1);
        assert_eq!(supervisor.restarts("other"), 0);
    }

    #[tokio::test]
    async fn fatal_error_saves_state_and_exits() {
        let dir = TempDir::new().unwrap();
        let shutdown = CancellationToken::new();
        let mut supervisor = Supervisor::new(shutdown.clone(), checkpoint(&dir));
        let runs = Arc::new(AtomicU32::new(0));
        supervisor.spawn(Arc::new(Flaky {
            name: "steady",
            failures: 0,
            panic: false,
            runs: Arc::clone(&runs),
        }));

        let fatal = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(ServiceError::Config("listener gone".into()))
        };
        let reason = supervisor.run(fatal, std::future::pending()).await;

        assert!(matches!(reason, ExitReason::Fatal(ServiceError::Config(_))));
        assert!(shutdown.is_cancelled());
        let saved = std::fs::read_to_string(dir.path().join("signatures.json")).unwrap();
        assert!(saved.contains("kept"));
        assert!(dir.path().join("pending.json").exists());
    }

    #[tokio::test]
    async fn stuck_actor_is_aborted_after_grace() {
        /// Ignores cancellation and counts ticks until aborted.
        struct Stubborn(Arc<AtomicU32>);

        #[async_trait]
        impl Actor for Stubborn {
            fn name(&self) -> &'static str {
                "stubborn"
            }

            async fn run(&self, _shutdown: CancellationToken) -> Result<(), ActorError> {
                loop {
                    self.0.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            }
        }

        let dir = TempDir::new().unwrap();
        let mut supervisor = Supervisor::new(CancellationToken::new(), checkpoint(&dir));
        supervisor.grace = Duration::from_millis(30);
        let ticks = Arc::new(AtomicU32::new(0));
        supervisor.spawn(Arc::new(Stubborn(Arc::clone(&ticks))));

        wait_for_runs(&ticks, 3).await;
        let reason = supervisor.run(std::future::pending(), async {}).await;
        assert!(matches!(reason, ExitReason::Signal));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let stopped_at = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), stopped_at);
    }

    #[tokio::test]
    async fn clean_exit_is_not_restarted() {
        struct Once(Arc<AtomicU32>);

        #[async_trait]
        impl Actor for Once {
            fn name(&self) -> &'static str {
                "once"
            }

            async fn run(&self, _shutdown: CancellationToken) -> Result<(), ActorError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let mut supervisor = Supervisor::new(CancellationToken::new(), checkpoint(&dir));
        let runs = Arc::new(AtomicU32::new(0));
        supervisor.spawn(Arc::new(Once(Arc::clone(&runs))));

        let signal = tokio::time::sleep(Duration::from_millis(50));
        supervisor.run(std::future::pending(), signal).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
