use super::StatsSnapshot;
use crate::errors::ScanError;
use crate::types::DetectionRecord;
use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Durable detection statistics.
///
/// Writers serialize on one mutex around "copy, update, persist, publish"; readers only
/// clone the published `Arc` and never observe a half-applied update or reset.
pub struct StatsStore {
    path: PathBuf,
    history_limit: usize,
    writer: Mutex<WriterState>,
    published: RwLock<Arc<StatsSnapshot>>,
}

#[derive(Debug, Default)]
struct WriterState {
    /// Memory holds changes the file does not.
    dirty: bool,
}

impl StatsStore {
    /// Load the store at `path`. A missing file starts empty; a corrupt one is logged and
    /// ignored until the next mutation overwrites it.
    pub fn open<P: AsRef<Path>>(path: P, history_limit: usize) -> Result<Self, ScanError> {
        let path = path.as_ref().to_path_buf();
        let history_limit = history_limit.max(1);

        let snapshot = if !path.exists() {
            log::info!("No stats file at {:?}, starting empty", path);
            StatsSnapshot::default()
        } else {
            let contents = fs::read_to_string(&path)
                .map_err(|e| ScanError::PersistenceFailure(format!("Failed to read {:?}: {}", path, e)))?;
            match serde_json::from_str::<StatsSnapshot>(&contents) {
                Ok(mut snapshot) => {
                    snapshot.trim_history(history_limit);
                    snapshot.summary.refresh_success_rate();
                    if !snapshot.summary.is_consistent() {
                        log::warn!("Stats file {:?} has inconsistent counters; keeping them as stored", path);
                    }
                    log::info!(
                        "Loaded stats from {:?} ({} detections, {} history entries)",
                        path,
                        snapshot.summary.total_detections,
                        snapshot.history.len()
                    );
                    snapshot
                }
                Err(e) => {
                    log::warn!("Stats file {:?} is corrupt, starting empty: {}", path, e);
                    StatsSnapshot::default()
                }
            }
        };

        Ok(Self {
            path,
            history_limit,
            writer: Mutex::new(WriterState::default()),
            published: RwLock::new(Arc::new(snapshot)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Consistent view of summary, history and last-updated time.
    pub fn read(&self) -> Arc<StatsSnapshot> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The newest `limit` records and the total number retained.
    pub fn history(&self, limit: usize) -> (Vec<DetectionRecord>, usize) {
        let snapshot = self.read();
        (snapshot.recent(limit).to_vec(), snapshot.history.len())
    }

    /// Whether the in-memory state is ahead of the file after a failed persist.
    pub fn is_dirty(&self) -> bool {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner).dirty
    }

    /// Count and append one record.
    ///
    /// On persistence failure the update still takes effect in memory and the error is
    /// returned; the next successful write catches the file up.
    pub fn record(&self, record: DetectionRecord) -> Result<Arc<StatsSnapshot>, ScanError> {
        log::debug!("Recording {} ({})", record.label, record.id);
        self.mutate(|snapshot| snapshot.apply(record, self.history_limit))
    }

    /// Zero the counters and clear the history in one step.
    pub fn reset(&self) -> Result<Arc<StatsSnapshot>, ScanError> {
        log::info!("Resetting detection statistics");
        self.mutate(|snapshot| {
            *snapshot = StatsSnapshot {
                last_updated: Some(Utc::now()),
                ..StatsSnapshot::default()
            };
        })
    }

    fn mutate<F>(&self, update: F) -> Result<Arc<StatsSnapshot>, ScanError>
    where
        F: FnOnce(&mut StatsSnapshot),
    {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = (*self.read()).clone();
        update(&mut next);

        let persisted = self.persist_with_retry(&next);
        let next = Arc::new(next);
        *self.published.write().unwrap_or_else(PoisonError::into_inner) = next.clone();

        match persisted {
            Ok(()) => {
                writer.dirty = false;
                Ok(next)
            }
            Err(e) => {
                writer.dirty = true;
                log::error!("Stats kept in memory only: {}", e);
                Err(e)
            }
        }
    }

    fn persist_with_retry(&self, snapshot: &StatsSnapshot) -> Result<(), ScanError> {
        match persist_atomically(&self.path, snapshot) {
            Ok(()) => Ok(()),
            Err(first) => {
                log::warn!("Persisting stats failed, retrying once: {}", first);
                persist_atomically(&self.path, snapshot)
            }
        }
    }
}

/// Write to a temp file in the target directory, fsync, then rename over the target.
fn persist_atomically(path: &Path, snapshot: &StatsSnapshot) -> Result<(), ScanError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)
        .map_err(|e| ScanError::PersistenceFailure(format!("Failed to create {:?}: {}", dir, e)))?;

    let json = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| ScanError::PersistenceFailure(format!("Failed to serialize stats: {}", e)))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .map_err(|e| ScanError::PersistenceFailure(format!("Failed to create temp file in {:?}: {}", dir, e)))?;
    tmp.write_all(&json)
        .map_err(|e| ScanError::PersistenceFailure(format!("Failed to write stats: {}", e)))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| ScanError::PersistenceFailure(format!("Failed to sync stats: {}", e)))?;
    tmp.persist(path)
        .map_err(|e| ScanError::PersistenceFailure(format!("Failed to replace {:?}: {}", path, e.error)))?;

    Ok(())
}
