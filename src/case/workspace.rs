//! In-memory case workspace with background persistence
//!
//! Holds every open case plus the active-case pointer. Each mutation publishes a
//! snapshot on a watch channel; a background task writes the newest snapshot to
//! the CaseStore, so callers never wait on disk and bursts of streamed fragments
//! coalesce into a few writes.

use crate::case::storage::CaseStore;
use crate::case::types::Case;
use crate::error::WorkflowError;
use anyhow::Result;
use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Handle to the stage run currently streaming into a case
#[derive(Debug, Clone)]
pub(crate) struct RunHandle {
    /// Monotonic id; fragments from any other id are stale
    pub(crate) run_id: u64,
    pub(crate) cancel: CancellationToken,
}

/// A case together with its in-flight run, if any
#[derive(Debug)]
pub(crate) struct CaseSlot {
    pub(crate) case: Case,
    pub(crate) run: Option<RunHandle>,
}

impl CaseSlot {
    pub(crate) fn is_running(&self) -> bool {
        self.run.is_some()
    }
}

/// Point-in-time copy of the workspace for the persistence task
#[derive(Debug, Clone)]
struct Snapshot {
    version: u64,
    cases: Vec<Case>,
    active_case_id: Option<String>,
}

/// Session context shared by the workflow engine and the HTTP layer
pub struct Workspace {
    slots: RwLock<HashMap<String, CaseSlot>>,
    active: ArcSwapOption<String>,
    store: Arc<dyn CaseStore>,
    snapshots: watch::Sender<Option<Snapshot>>,
    /// Highest snapshot version written so far
    written: Arc<Mutex<u64>>,
    next_version: AtomicU64,
}

impl Workspace {
    /// Load all cases from the store and start the persistence task
    pub async fn load(store: Arc<dyn CaseStore>) -> Result<Arc<Self>> {
        let cases = store.load_all().await?;
        let mut active_case_id = store.load_active_case_id().await?;

        let slots: HashMap<String, CaseSlot> = cases
            .into_iter()
            .map(|case| (case.id().to_string(), CaseSlot { case, run: None }))
            .collect();

        if let Some(id) = &active_case_id {
            if !slots.contains_key(id) {
                tracing::warn!("Active case '{}' no longer exists, clearing pointer", id);
                active_case_id = None;
            }
        }

        tracing::info!("📥 Loaded workspace with {} cases", slots.len());

        let (snapshots, receiver) = watch::channel(None);
        let written = Arc::new(Mutex::new(0));
        spawn_persister(Arc::clone(&store), receiver, Arc::clone(&written));

        Ok(Arc::new(Self {
            slots: RwLock::new(slots),
            active: ArcSwapOption::from(active_case_id.map(Arc::new)),
            store,
            snapshots,
            written,
            next_version: AtomicU64::new(1),
        }))
    }

    /// All cases, most recently modified first
    pub async fn list(&self) -> Vec<Case> {
        let slots = self.slots.read().await;
        let mut cases: Vec<Case> = slots.values().map(|slot| slot.case.clone()).collect();
        cases.sort_by(|a, b| b.last_modified_at().cmp(&a.last_modified_at()));
        cases
    }

    pub async fn get(&self, id: &str) -> Result<Case, WorkflowError> {
        self.read(id, |slot| slot.case.clone()).await
    }

    pub async fn is_running(&self, id: &str) -> Result<bool, WorkflowError> {
        self.read(id, CaseSlot::is_running).await
    }

    /// Add a new case and make it the active one
    pub async fn insert(&self, case: Case) -> Case {
        let mut slots = self.slots.write().await;
        let id = case.id().to_string();
        slots.insert(id.clone(), CaseSlot { case: case.clone(), run: None });
        self.active.store(Some(Arc::new(id)));
        self.publish(&slots);
        case
    }

    /// Delete a case, cancelling any run streaming into it
    pub async fn remove(&self, id: &str) -> Result<Case, WorkflowError> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .remove(id)
            .ok_or_else(|| WorkflowError::CaseNotFound(id.to_string()))?;

        if let Some(run) = &slot.run {
            tracing::info!("🛑 Cancelling run {} for deleted case {}", run.run_id, id);
            run.cancel.cancel();
        }

        if self.active_case_id().as_deref() == Some(id) {
            self.active.store(None);
        }

        self.publish(&slots);
        Ok(slot.case)
    }

    pub fn active_case_id(&self) -> Option<String> {
        self.active.load_full().map(|id| (*id).clone())
    }

    /// Point the workspace at another case (or at none)
    pub async fn set_active(&self, id: Option<&str>) -> Result<(), WorkflowError> {
        let slots = self.slots.read().await;
        if let Some(id) = id {
            if !slots.contains_key(id) {
                return Err(WorkflowError::CaseNotFound(id.to_string()));
            }
        }
        self.active.store(id.map(|id| Arc::new(id.to_string())));
        self.publish(&slots);
        Ok(())
    }

    /// Apply a mutation to one case and persist the result
    ///
    /// The closure must validate before mutating: when it returns an error the
    /// case must be left untouched, and nothing is persisted.
    pub(crate) async fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut CaseSlot) -> Result<R, WorkflowError>,
    ) -> Result<R, WorkflowError> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(id)
            .ok_or_else(|| WorkflowError::CaseNotFound(id.to_string()))?;
        let result = f(slot)?;
        self.publish(&slots);
        Ok(result)
    }

    pub(crate) async fn read<R>(
        &self,
        id: &str,
        f: impl FnOnce(&CaseSlot) -> R,
    ) -> Result<R, WorkflowError> {
        let slots = self.slots.read().await;
        let slot = slots
            .get(id)
            .ok_or_else(|| WorkflowError::CaseNotFound(id.to_string()))?;
        Ok(f(slot))
    }

    /// Write the current state to the store and wait for it
    pub async fn flush(&self) -> Result<()> {
        let snapshot = {
            let slots = self.slots.read().await;
            self.snapshot(&slots)
        };
        write_snapshot(self.store.as_ref(), &self.written, &snapshot).await
    }

    fn snapshot(&self, slots: &HashMap<String, CaseSlot>) -> Snapshot {
        Snapshot {
            version: self.next_version.fetch_add(1, Ordering::SeqCst),
            cases: slots.values().map(|slot| slot.case.clone()).collect(),
            active_case_id: self.active_case_id(),
        }
    }

    /// Hand the newest state to the persistence task without waiting
    fn publish(&self, slots: &HashMap<String, CaseSlot>) {
        let snapshot = self.snapshot(slots);
        tracing::debug!("Queued workspace snapshot v{}", snapshot.version);
        self.snapshots.send_replace(Some(snapshot));
    }
}

fn spawn_persister(
    store: Arc<dyn CaseStore>,
    mut receiver: watch::Receiver<Option<Snapshot>>,
    written: Arc<Mutex<u64>>,
) {
    tokio::spawn(async move {
        while receiver.changed().await.is_ok() {
            let snapshot = receiver.borrow_and_update().clone();
            if let Some(snapshot) = snapshot {
                if let Err(e) = write_snapshot(store.as_ref(), &written, &snapshot).await {
                    tracing::error!("❌ Failed to persist workspace snapshot v{}: {}", snapshot.version, e);
                }
            }
        }
        tracing::debug!("Workspace persistence task stopped");
    });
}

/// Write a snapshot unless a newer one already reached the store
async fn write_snapshot(store: &dyn CaseStore, written: &Mutex<u64>, snapshot: &Snapshot) -> Result<()> {
    let mut last_written = written.lock().await;
    if snapshot.version <= *last_written {
        return Ok(());
    }

    store.save_all(&snapshot.cases).await?;
    store.save_active_case_id(snapshot.active_case_id.as_deref()).await?;
    *last_written = snapshot.version;

    Ok(())
}
