//! Durable counters the scheduler leans on between ticks.
//!
//! Both live outside the scheduler's own logic: the sprint counter names
//! backup branches, the reconciliation tracker makes sure a sprint's
//! drift is handed to an agent only once.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

pub trait SprintCounter: Send + Sync {
    fn current_sprint(&self) -> Result<u32, TrackerError>;

    /// Advance to the next sprint and return it.
    fn increment_sprint(&self) -> Result<u32, TrackerError>;
}

pub trait ReconciliationTracker: Send + Sync {
    fn can_reconcile(&self, sprint: u32) -> bool;

    fn mark_reconciled(&self, sprint: u32, session_id: &str) -> Result<(), TrackerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub sprint: u32,
    pub session_id: String,
    pub recorded_at: DateTime<Utc>,
}

fn read_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T, TrackerError> {
    match std::fs::read_to_string(path) {
        Ok(raw) if raw.trim().is_empty() => Ok(T::default()),
        Ok(raw) => serde_json::from_str(&raw).map_err(|source| TrackerError::Json {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(source) => Err(TrackerError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Write via a sibling temp file so a crash never leaves half a file.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TrackerError> {
    let io_err = |source| TrackerError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let raw = serde_json::to_string_pretty(value).map_err(|source| TrackerError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, raw).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

#[derive(Debug, Serialize, Deserialize)]
struct SprintFile {
    sprint: u32,
}

impl Default for SprintFile {
    fn default() -> Self {
        Self { sprint: 1 }
    }
}

/// Sprint number stored as `{"sprint": N}`; starts at 1.
pub struct FileSprintCounter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSprintCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

impl SprintCounter for FileSprintCounter {
    fn current_sprint(&self) -> Result<u32, TrackerError> {
        let file: SprintFile = read_json(&self.path)?;
        Ok(file.sprint)
    }

    fn increment_sprint(&self) -> Result<u32, TrackerError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file: SprintFile = read_json(&self.path)?;
        file.sprint += 1;
        write_json(&self.path, &file)?;
        Ok(file.sprint)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ReconciliationFile {
    #[serde(default)]
    reconciled: BTreeMap<u32, ReconciliationRecord>,
}

/// `{ "reconciled": { "<sprint>": record } }` on disk.
pub struct FileReconciliationTracker {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileReconciliationTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn records(&self) -> Result<Vec<ReconciliationRecord>, TrackerError> {
        let file: ReconciliationFile = read_json(&self.path)?;
        Ok(file.reconciled.into_values().collect())
    }
}

impl ReconciliationTracker for FileReconciliationTracker {
    /// An unreadable file blocks reconciliation rather than risking a
    /// second session for the same sprint.
    fn can_reconcile(&self, sprint: u32) -> bool {
        match read_json::<ReconciliationFile>(&self.path) {
            Ok(file) => !file.reconciled.contains_key(&sprint),
            Err(e) => {
                tracing::warn!(sprint, "Reconciliation tracker unreadable: {e}");
                false
            }
        }
    }

    fn mark_reconciled(&self, sprint: u32, session_id: &str) -> Result<(), TrackerError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file: ReconciliationFile = read_json(&self.path)?;
        file.reconciled
            .entry(sprint)
            .or_insert_with(|| ReconciliationRecord {
                sprint,
                session_id: session_id.to_string(),
                recorded_at: Utc::now(),
            });
        write_json(&self.path, &file)
    }
}

/// In-process tracker for dry runs and tests.
#[derive(Default)]
pub struct MemoryReconciliationTracker {
    records: Mutex<BTreeMap<u32, String>>,
}

impl MemoryReconciliationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_for(&self, sprint: u32) -> Option<String> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&sprint)
            .cloned()
    }
}

impl ReconciliationTracker for MemoryReconciliationTracker {
    fn can_reconcile(&self, sprint: u32) -> bool {
        !self
            .records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(&sprint)
    }

    fn mark_reconciled(&self, sprint: u32, session_id: &str) -> Result<(), TrackerError> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(sprint)
            .or_insert_with(|| session_id.to_string());
        Ok(())
    }
}

/// In-process sprint counter.
pub struct MemorySprintCounter {
    sprint: Mutex<u32>,
}

impl MemorySprintCounter {
    pub fn new(start: u32) -> Self {
        Self {
            sprint: Mutex::new(start),
        }
    }
}

impl SprintCounter for MemorySprintCounter {
    fn current_sprint(&self) -> Result<u32, TrackerError> {
        Ok(*self.sprint.lock().unwrap_or_else(|p| p.into_inner()))
    }

    fn increment_sprint(&self) -> Result<u32, TrackerError> {
        let mut sprint = self.sprint.lock().unwrap_or_else(|p| p.into_inner());
        *sprint += 1;
        Ok(*sprint)
    }
}
