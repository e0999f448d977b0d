//! Signature store: sole writer of the map of completed, unclaimed signatures.
//!
//! Recording a signature also tells the pending tracker the request is done,
//! so the store is the only place a signed job leaves the pending map.
//!
//! Claims go through the actor too: [`StoreHandle::take`] waits for the
//! removal to be applied and gets back whatever it removed, so two callers
//! racing for the same id cannot both receive the signature.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::job::SigningOutcome;
use super::supervisor::Actor;
use super::tracker::TrackerHandle;
use crate::error::ActorError;

pub type SignatureMap = HashMap<String, String>;

#[derive(Debug)]
enum Command {
    Apply(SigningOutcome),
    /// Remove `id` and report what was removed.
    Take {
        id: String,
        reply: oneshot::Sender<Option<String>>,
    },
}

pub struct SignatureStore {
    signatures: Arc<RwLock<SignatureMap>>,
    commands: Mutex<mpsc::UnboundedReceiver<Command>>,
    tracker: TrackerHandle,
}

#[derive(Debug, Clone)]
pub struct StoreHandle {
    signatures: Arc<RwLock<SignatureMap>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl SignatureStore {
    pub const NAME: &'static str = "signature-store";

    pub fn new(initial: SignatureMap, tracker: TrackerHandle) -> (Self, StoreHandle) {
        let signatures = Arc::new(RwLock::new(initial));
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Self {
            signatures: Arc::clone(&signatures),
            commands: Mutex::new(rx),
            tracker,
        };
        let handle = StoreHandle {
            signatures,
            commands: tx,
        };
        (store, handle)
    }

    async fn handle(&self, command: Command) -> Result<(), ActorError> {
        match command {
            Command::Apply(outcome) => self.apply(outcome).await.map(drop),
            Command::Take { id, reply } => {
                let claimed = self.apply(SigningOutcome::Remove { id }).await?;
                // The caller may have given up waiting.
                let _ = reply.send(claimed);
                Ok(())
            }
        }
    }

    /// Returns the removed signature for `Remove`, `None` for `Upsert`.
    async fn apply(&self, outcome: SigningOutcome) -> Result<Option<String>, ActorError> {
        match outcome {
            SigningOutcome::Upsert { id, signature } => {
                self.signatures
                    .write()
                    .await
                    .insert(id.clone(), signature);
                debug!(job_id = %id, "signature stored");
                self.tracker.remove(id)?;
                Ok(None)
            }
            SigningOutcome::Remove { id } => {
                let removed = self.signatures.write().await.remove(&id);
                if removed.is_some() {
                    debug!(job_id = %id, "signature claimed");
                }
                Ok(removed)
            }
        }
    }
}

#[async_trait]
impl Actor for SignatureStore {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<(), ActorError> {
        let mut commands = self.commands.lock().await;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    // Apply what is already queued so the checkpoint sees it.
                    while let Ok(command) = commands.try_recv() {
                        if let Err(e) = self.handle(command).await {
                            warn!(error = %e, "command failed while draining");
                        }
                    }
                    return Ok(());
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await?,
                    None => return Ok(()),
                },
            }
        }
    }
}

impl StoreHandle {
    pub fn apply(&self, outcome: SigningOutcome) -> Result<(), ActorError> {
        trace!(job_id = outcome.id(), actor = SignatureStore::NAME, "queueing command");
        self.send(Command::Apply(outcome))
    }

    pub fn upsert(
        &self,
        id: impl Into<String>,
        signature: impl Into<String>,
    ) -> Result<(), ActorError> {
        self.apply(SigningOutcome::Upsert {
            id: id.into(),
            signature: signature.into(),
        })
    }

    /// Claim the signature for `id`. At most one caller ever gets `Some`.
    pub async fn take(&self, id: impl Into<String>) -> Result<Option<String>, ActorError> {
        let (reply, claimed) = oneshot::channel();
        self.send(Command::Take {
            id: id.into(),
            reply,
        })?;
        claimed.await.map_err(|_| ActorError::ChannelClosed {
            actor: SignatureStore::NAME,
        })
    }

    pub async fn get(&self, id: &str) -> Option<String> {
        self.signatures.read().await.get(id).cloned()
    }

    pub async fn snapshot(&self) -> SignatureMap {
        self.signatures.read().await.clone()
    }

    fn send(&self, command: Command) -> Result<(), ActorError> {
        self.commands
            .send(command)
            .map_err(|_| ActorError::ChannelClosed {
                actor: SignatureStore::NAME,
            })
    }
}
