//! Crash-safe `state.json` snapshots with coalesced background writes.

use crate::{
    AgentError,
    Result,
    ticket::RegistrySnapshot,
};
use anyhow::Context;
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
};

pub const STATE_FILE: &str = "state.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub saved_at: DateTime<Utc>,
    #[serde(flatten)]
    pub registry: RegistrySnapshot,
}

impl StateSnapshot {
    pub fn new(registry: RegistrySnapshot) -> Self {
        Self {
            saved_at: Utc::now(),
            registry,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temporary_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// `None` when no state was ever saved.
    pub fn load(&self) -> Result<Option<StateSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))
            .map_err(AgentError::persistence)?;
        let snapshot = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to decode {}", self.path.display()))
            .map_err(AgentError::persistence)?;
        Ok(Some(snapshot))
    }

    pub fn save(&self, snapshot: &StateSnapshot) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state directory {}", parent.display())
            })?;
        }
        let bytes =
            serde_json::to_vec_pretty(snapshot).context("Failed to encode state snapshot")?;
        let temporary = self.temporary_path();
        fs::write(&temporary, bytes)
            .with_context(|| format!("Failed to write {}", temporary.display()))?;
        fs::rename(&temporary, &self.path).with_context(|| {
            format!("Failed to move {} into place", temporary.display())
        })?;
        Ok(())
    }
}

/// Background writer. Requests made while a write is running collapse into a
/// single follow-up write of the newest snapshot.
pub struct PersistenceManager {
    store: StateStore,
    latest: watch::Sender<Option<Arc<StateSnapshot>>>,
    writer: JoinHandle<()>,
}

impl PersistenceManager {
    pub fn start(store: StateStore) -> Self {
        let (latest, updates) = watch::channel(None);
        let writer = tokio::spawn(write_loop(store.clone(), updates));
        Self {
            store,
            latest,
            writer,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn request_save(&self, snapshot: StateSnapshot) {
        self.latest.send_replace(Some(Arc::new(snapshot)));
    }

    /// Stop the writer and save `last` synchronously.
    pub async fn shutdown(self, last: StateSnapshot) -> Result<()> {
        drop(self.latest);
        if let Err(err) = self.writer.await {
            tracing::error!(error = %err, "state writer task failed");
        }
        self.store.save(&last).map_err(AgentError::persistence)?;
        tracing::info!(path = %self.store.path().display(), "final state saved");
        Ok(())
    }
}

async fn write_loop(
    store: StateStore,
    mut updates: watch::Receiver<Option<Arc<StateSnapshot>>>,
) {
    while updates.changed().await.is_ok() {
        let Some(snapshot) = updates.borrow_and_update().clone() else {
            continue;
        };
        let store = store.clone();
        let written = tokio::task::spawn_blocking(move || store.save(&snapshot)).await;
        match written {
            Ok(Ok(())) => tracing::debug!("state saved"),
            Ok(Err(err)) => {
                tracing::error!(error = %format!("{err:#}"), "failed to save state")
            }
            Err(err) => tracing::error!(error = %err, "state save task panicked"),
        }
    }
}
