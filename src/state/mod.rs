//! Durable record of customer IDs that reached a definitive outcome.
//!
//! The set lives in memory for lookups and is persisted as two files per
//! store:
//!
//! - a snapshot, `{store_hash}.json`, replaced atomically through a
//!   temporary file and a rename;
//! - a journal next to it, `{store_hash}.journal`, which
//!   [`StateStore::mark_done`] appends one fsynced JSON line per batch to.
//!
//! A batch is therefore either fully on disk or, when the process died in
//! the middle of the append, a torn last line that is dropped on the next
//! load. [`StateStore::load`] folds the journal into a fresh snapshot, and
//! so does [`StateStore::compact`] at the end of a run, which keeps the
//! per-batch cost proportional to the batch instead of the whole set.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::types::CustomerId;
use crate::types::error::BcrmError;

const JOURNAL_EXTENSION: &str = "journal";

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    processed_ids: Vec<CustomerId>,
    #[serde(default)]
    total_customers: Option<u64>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// One line of the journal: the IDs of a finished batch.
#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    ids: Vec<CustomerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_customers: Option<u64>,
}

pub struct StateStore {
    path: PathBuf,
    journal_path: PathBuf,
    processed: RwLock<HashSet<CustomerId>>,
    total_customers: Mutex<Option<u64>>,
    // Serialises writers so two appends never interleave.
    write_lock: tokio::sync::Mutex<()>,
}

impl StateStore {
    /// Load the processed set for the snapshot at `path`, replaying and then
    /// compacting any journal left by an earlier run. Starts empty when
    /// neither file exists. An unreadable or corrupt file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let journal_path = journal_path(path);

        let (mut processed, mut total_customers) = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                anyhow!(BcrmError::State(format!(
                    "failed to read state file {}: {e}",
                    path.display()
                )))
            })?;
            let document: StateDocument = serde_json::from_str(&content).map_err(|e| {
                anyhow!(BcrmError::State(format!(
                    "state file {} is corrupt: {e}",
                    path.display()
                )))
            })?;

            let processed: HashSet<CustomerId> = document.processed_ids.into_iter().collect();
            (processed, document.total_customers)
        } else {
            debug!(path = %path.display(), "no state file found, starting fresh.");
            (HashSet::new(), None)
        };

        let replayed = if journal_path.exists() {
            let replayed = replay_journal(&journal_path, &mut processed, &mut total_customers)?;
            write_snapshot(path, &processed, total_customers)
                .and_then(|()| remove_if_exists(&journal_path))
                .map_err(|e| {
                    anyhow!(BcrmError::State(format!(
                        "failed to compact state journal {}: {e:#}",
                        journal_path.display()
                    )))
                })?;
            replayed
        } else {
            0
        };

        if !processed.is_empty() || replayed > 0 {
            info!(
                path = %path.display(),
                processed = processed.len(),
                replayed_batches = replayed,
                "loaded deletion state."
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            journal_path,
            processed: RwLock::new(processed),
            total_customers: Mutex::new(total_customers),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Remove the snapshot and the journal for an explicit operator reset.
    pub fn clear(path: &Path) -> Result<()> {
        for file in [path.to_path_buf(), journal_path(path)] {
            remove_if_exists(&file).map_err(|e| {
                anyhow!(BcrmError::State(format!(
                    "failed to remove state file {}: {e:#}",
                    file.display()
                )))
            })?;
        }
        info!(path = %path.display(), "state cleared.");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    pub fn contains(&self, id: CustomerId) -> bool {
        self.processed.read().unwrap().contains(&id)
    }

    pub fn size(&self) -> u64 {
        self.processed.read().unwrap().len() as u64
    }

    pub fn processed_ids(&self) -> Vec<CustomerId> {
        let mut ids: Vec<CustomerId> = self.processed.read().unwrap().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn total_customers(&self) -> Option<u64> {
        *self.total_customers.lock().unwrap()
    }

    /// Remember the first total observed for this store. Written out with
    /// the next batch.
    pub fn record_total_customers(&self, total: u64) {
        let mut total_customers = self.total_customers.lock().unwrap();
        if total_customers.is_none() {
            *total_customers = Some(total);
        }
    }

    /// Durably record every ID of a batch. Returns after the journal line
    /// has been written and synced. The in-memory set only changes once the
    /// write succeeded.
    pub async fn mark_done(&self, ids: &[CustomerId]) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let entry = JournalEntry {
            ids: ids.to_vec(),
            total_customers: self.total_customers(),
        };
        let mut line = serde_json::to_vec(&entry).context("serialize journal entry")?;
        line.push(b'\n');

        let journal_path = self.journal_path.clone();
        tokio::task::spawn_blocking(move || append_durably(&journal_path, &line))
            .await
            .context("state writer task panicked")?
            .map_err(|e| {
                anyhow!(BcrmError::State(format!(
                    "failed to persist state journal {}: {e:#}",
                    self.journal_path.display()
                )))
            })?;

        self.processed.write().unwrap().extend(ids.iter().copied());
        trace!(count = ids.len(), "state journal appended.");

        Ok(())
    }

    /// Fold the journal into a new snapshot. Does nothing when no batch was
    /// recorded since the last snapshot.
    pub async fn compact(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if !self.journal_path.exists() {
            return Ok(());
        }

        let processed = self.processed.read().unwrap().clone();
        let total_customers = self.total_customers();
        let path = self.path.clone();
        let journal_path = self.journal_path.clone();
        tokio::task::spawn_blocking(move || {
            write_snapshot(&path, &processed, total_customers)?;
            remove_if_exists(&journal_path)
        })
        .await
        .context("state compaction task panicked")?
        .map_err(|e| {
            anyhow!(BcrmError::State(format!(
                "failed to compact state journal {}: {e:#}",
                self.journal_path.display()
            )))
        })?;

        debug!(path = %self.path.display(), "state journal compacted.");
        Ok(())
    }
}

fn journal_path(path: &Path) -> PathBuf {
    path.with_extension(JOURNAL_EXTENSION)
}

/// Apply every journal line to `processed`. Returns the number of batches
/// replayed. An unterminated last line is the remains of an interrupted
/// append and is dropped; any other unreadable line is an error.
fn replay_journal(
    journal_path: &Path,
    processed: &mut HashSet<CustomerId>,
    total_customers: &mut Option<u64>,
) -> Result<u64> {
    let content = std::fs::read_to_string(journal_path).map_err(|e| {
        anyhow!(BcrmError::State(format!(
            "failed to read state journal {}: {e}",
            journal_path.display()
        )))
    })?;

    let terminated = content.ends_with('\n');
    let lines: Vec<&str> = content.lines().collect();
    let mut replayed = 0;
    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: JournalEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) if index + 1 == lines.len() && !terminated => {
                warn!(
                    path = %journal_path.display(),
                    "dropping incomplete last journal line: {e}"
                );
                break;
            }
            Err(e) => {
                return Err(anyhow!(BcrmError::State(format!(
                    "state journal {} is corrupt at line {}: {e}",
                    journal_path.display(),
                    index + 1
                ))));
            }
        };

        processed.extend(entry.ids);
        if total_customers.is_none() {
            *total_customers = entry.total_customers;
        }
        replayed += 1;
    }

    Ok(replayed)
}

fn write_snapshot(
    path: &Path,
    processed: &HashSet<CustomerId>,
    total_customers: Option<u64>,
) -> Result<()> {
    let mut processed_ids: Vec<CustomerId> = processed.iter().copied().collect();
    processed_ids.sort_unstable();

    let document = StateDocument {
        processed_ids,
        total_customers,
        updated_at: Some(Utc::now()),
    };
    let bytes = serde_json::to_vec(&document).context("serialize state document")?;
    write_atomically(path, &bytes)
}

fn state_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = state_dir(path);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create state directory {}", dir.display()))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("create temporary file in {}", dir.display()))?;
    temp_file.write_all(bytes)?;
    temp_file.as_file().sync_all()?;
    temp_file
        .persist(path)
        .map_err(|e| anyhow!("rename into {}: {}", path.display(), e.error))?;

    Ok(())
}

fn append_durably(path: &Path, line: &[u8]) -> Result<()> {
    let dir = state_dir(path);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create state directory {}", dir.display()))?;

    let mut journal = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    journal.write_all(line)?;
    journal.sync_data()?;

    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow!("remove {}: {e}", path.display())),
    }
}
