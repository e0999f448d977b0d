//! Best-effort snapshots of the signature and pending maps.
//!
//! Loading never fails: a missing, empty or unreadable file yields an empty
//! map. Saving logs failures and moves on.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use super::job::Job;
use super::store::{SignatureMap, StoreHandle};
use super::tracker::{PendingMap, TrackerHandle};
use crate::error::ServiceError;

/// State read back at startup.
#[derive(Debug, Default)]
pub struct RecoveredState {
    pub signatures: SignatureMap,
    pub pending: PendingMap,
}

impl RecoveredState {
    /// Jobs that still need signing, oldest admission first.
    pub fn jobs(&self) -> Vec<Job> {
        let mut entries: Vec<_> = self.pending.values().collect();
        entries.sort_by_key(|entry| entry.timing.submitted_at);
        entries.into_iter().map(|entry| entry.job.clone()).collect()
    }
}

/// Locations of the two snapshot files.
#[derive(Debug, Clone)]
pub struct StateFiles {
    signatures: PathBuf,
    pending: PathBuf,
}

impl StateFiles {
    pub fn new(signatures: impl Into<PathBuf>, pending: impl Into<PathBuf>) -> Self {
        Self {
            signatures: signatures.into(),
            pending: pending.into(),
        }
    }

    pub fn load(&self) -> RecoveredState {
        let state = RecoveredState {
            signatures: load_map(&self.signatures),
            pending: load_map(&self.pending),
        };
        info!(
            signatures = state.signatures.len(),
            pending = state.pending.len(),
            "recovered state"
        );
        state
    }

    pub fn save(&self, signatures: &SignatureMap, pending: &PendingMap) {
        if let Err(e) = save_map(&self.signatures, signatures) {
            error!(path = %self.signatures.display(), error = %e, "failed saving signatures");
        }
        if let Err(e) = save_map(&self.pending, pending) {
            error!(path = %self.pending.display(), error = %e, "failed saving pending requests");
        }
    }
}

fn load_map<T: DeserializeOwned>(path: &Path) -> HashMap<String, T> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no snapshot, starting empty");
            return HashMap::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unable to read snapshot");
            return HashMap::new();
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return HashMap::new();
    }
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "unable to parse snapshot");
        HashMap::new()
    })
}

fn save_map<T: Serialize>(path: &Path, map: &HashMap<String, T>) -> Result<(), ServiceError> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(map)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Writes both maps as they stand when [`persist`](Checkpoint::persist) runs.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    files: StateFiles,
    store: StoreHandle,
    tracker: TrackerHandle,
}

impl Checkpoint {
    pub fn new(files: StateFiles, store: StoreHandle, tracker: TrackerHandle) -> Self {
        Self {
            files,
            store,
            tracker,
        }
    }

    pub async fn persist(&self) {
        let signatures = self.store.snapshot().await;
        let mut pending = self.tracker.snapshot().await;
        // A signed job whose tracker removal never ran is not pending.
        pending.retain(|id, _| !signatures.contains_key(id));
        self.files.save(&signatures, &pending);
        info!(
            signatures = signatures.len(),
            pending = pending.len(),
            "state saved"
        );
    }
}
